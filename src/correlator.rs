//! Request-id to operation-id correlation.
//!
//! Every request an executor sends carries a fresh request id allocated
//! here. The matching response (or error) resolves the id back to the
//! owning action and the logical step it stands for. Each entry is removed
//! exactly once: by its response, by its error, or when its owner stops.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use ds::{RequestId, NO_REQUEST_ID};
use parking_lot::Mutex;

use crate::action::{ActionId, OperationId};

/// An outstanding correlated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub operation_id: OperationId,
    pub owner: ActionId,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<RequestId, PendingRequest>,
    by_owner: HashMap<ActionId, HashSet<RequestId>>,
}

impl Inner {
    fn remove(&mut self, request_id: RequestId) -> Option<PendingRequest> {
        let pending = self.pending.remove(&request_id)?;
        if let Some(ids) = self.by_owner.get_mut(&pending.owner) {
            ids.remove(&request_id);
            if ids.is_empty() {
                self.by_owner.remove(&pending.owner);
            }
        }
        Some(pending)
    }
}

pub struct Correlator {
    next_request_id: AtomicI64,
    inner: Mutex<Inner>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicI64::new(NO_REQUEST_ID + 1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Allocate a request id without tracking it. Never returns `NO_REQUEST_ID`.
    pub fn new_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate a request id and record it as step `operation_id` of `owner`.
    pub fn new_operation(&self, owner: ActionId, operation_id: OperationId) -> RequestId {
        let request_id = self.new_request_id();
        let mut inner = self.inner.lock();
        inner.pending.insert(
            request_id,
            PendingRequest {
                request_id,
                operation_id,
                owner,
            },
        );
        inner.by_owner.entry(owner).or_default().insert(request_id);
        request_id
    }

    /// Remove and return the entry for `request_id`, whoever owns it.
    pub fn resolve(&self, request_id: RequestId) -> Option<PendingRequest> {
        self.inner.lock().remove(request_id)
    }

    /// Remove the entry for `request_id` only if `owner` holds it.
    pub fn take_for(&self, owner: ActionId, request_id: RequestId) -> Option<OperationId> {
        let mut inner = self.inner.lock();
        match inner.pending.get(&request_id) {
            Some(pending) if pending.owner == owner => {
                inner.remove(request_id).map(|p| p.operation_id)
            }
            _ => None,
        }
    }

    /// Outstanding requests of `owner`, oldest request id first.
    pub fn outstanding_for(&self, owner: ActionId) -> Vec<PendingRequest> {
        let inner = self.inner.lock();
        let mut requests: Vec<PendingRequest> = inner
            .by_owner
            .get(&owner)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.pending.get(id).copied())
            .collect();
        requests.sort_by_key(|p| p.request_id);
        requests
    }

    /// Drop every outstanding request of `owner`.
    pub fn cancel_owner(&self, owner: ActionId) -> Vec<PendingRequest> {
        let mut inner = self.inner.lock();
        let ids = inner.by_owner.remove(&owner).unwrap_or_default();
        let mut removed: Vec<PendingRequest> = ids
            .into_iter()
            .filter_map(|id| inner.pending.remove(&id))
            .collect();
        removed.sort_by_key(|p| p.request_id);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

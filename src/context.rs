//! The shared hub every action and executor is started against.
//!
//! A [`Context`] owns the three structures shared between the caller side,
//! the timeout scheduler and the transport callbacks:
//!
//! - the [`Correlator`] (request id -> owning action + operation id),
//! - the [`DeadlineQueue`] (pending actions by expiration),
//! - the live-action table (action id -> action).
//!
//! Each structure has its own lock and no lock is held while calling into
//! an action. When several are touched for one event the order is always
//! correlator, then deadline queue, then action table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ds::{DeliveryService, ErrorCode, RequestId, TransportEvent};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionId, ManagedAction, Payload};
use crate::clock::{Clock, TokioClock};
use crate::config::ContextConfig;
use crate::correlator::Correlator;
use crate::deadline_queue::DeadlineQueue;

/// Result of routing an inbound response or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the owning action.
    Delivered,
    /// The request id is not (or no longer) tracked. Late or duplicate
    /// responses after a timeout land here; they are dropped.
    UnknownCorrelation(RequestId),
}

pub struct Context {
    config: ContextConfig,
    clock: Arc<dyn Clock>,
    delivery: Arc<dyn DeliveryService>,
    correlator: Correlator,
    deadlines: DeadlineQueue,
    actions: Mutex<HashMap<ActionId, Arc<dyn ManagedAction>>>,
    next_action_id: AtomicU64,
    ready: AtomicBool,
    online: AtomicBool,
}

impl Context {
    pub fn new(config: ContextConfig, delivery: Arc<dyn DeliveryService>) -> Arc<Self> {
        Self::with_clock(config, delivery, Arc::new(TokioClock))
    }

    pub fn with_clock(
        config: ContextConfig,
        delivery: Arc<dyn DeliveryService>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let online = config.start_online;
        Arc::new(Self {
            config,
            clock,
            delivery,
            correlator: Correlator::new(),
            deadlines: DeadlineQueue::new(),
            actions: Mutex::new(HashMap::new()),
            next_action_id: AtomicU64::new(1),
            ready: AtomicBool::new(online),
            online: AtomicBool::new(online),
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn delivery(&self) -> &Arc<dyn DeliveryService> {
        &self.delivery
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn deadlines(&self) -> &DeadlineQueue {
        &self.deadlines
    }

    pub fn allocate_action_id(&self) -> ActionId {
        self.next_action_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate an uncorrelated request id.
    /// Request id for a message the caller correlates itself, such as a
    /// notification ack. Shares the counter of correlated requests.
    pub fn new_request_id(&self) -> RequestId {
        self.correlator.new_request_id()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    // ─────────────────────────── Action tracking ───────────────────────────

    /// Track `action` and queue its deadline, if it has one.
    ///
    /// Returns `false` if an action with the same id is already tracked.
    pub fn start_action(&self, action: Arc<dyn ManagedAction>) -> bool {
        let id = action.action_id();
        let deadline = action.deadline();
        {
            let mut actions = self.actions.lock();
            if actions.contains_key(&id) {
                warn!("[start_action]: action {id} already started");
                return false;
            }
            actions.insert(id, action);
        }
        if let Some(deadline) = deadline {
            self.deadlines.insert(id, deadline);
        }
        true
    }

    /// Stop tracking action `id`. Returns `false` if it was not tracked.
    pub fn finish_action(&self, id: ActionId) -> bool {
        self.deadlines.remove(id);
        self.actions.lock().remove(&id).is_some()
    }

    fn action(&self, id: ActionId) -> Option<Arc<dyn ManagedAction>> {
        self.actions.lock().get(&id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ManagedAction>> {
        self.actions.lock().values().cloned().collect()
    }

    /// Number of started, unfinished actions.
    pub fn pending_actions(&self) -> usize {
        self.actions.lock().len()
    }

    /// Number of correlated requests still waiting for an answer.
    pub fn outstanding_requests(&self) -> usize {
        self.correlator.len()
    }

    /// Cancel every live action.
    pub fn cancel_all(&self) {
        for action in self.snapshot() {
            action.cancel();
        }
    }

    // ─────────────────────────── Transport callbacks ───────────────────────────

    pub fn on_response(&self, request_id: RequestId, payload: Payload) -> Dispatch {
        let Some(pending) = self.correlator.resolve(request_id) else {
            debug!("[on_response]: unknown request id {request_id}, dropped");
            return Dispatch::UnknownCorrelation(request_id);
        };
        match self.action(pending.owner) {
            Some(action) => {
                action.on_response(request_id, pending.operation_id, payload);
                Dispatch::Delivered
            }
            None => {
                debug!(
                    "[on_response]: owner {} of request {request_id} already finished",
                    pending.owner
                );
                Dispatch::UnknownCorrelation(request_id)
            }
        }
    }

    pub fn on_error(
        &self,
        request_id: RequestId,
        code: ErrorCode,
        parameter: Option<String>,
    ) -> Dispatch {
        let Some(pending) = self.correlator.resolve(request_id) else {
            debug!("[on_error]: unknown request id {request_id} ({code}), dropped");
            return Dispatch::UnknownCorrelation(request_id);
        };
        match self.action(pending.owner) {
            Some(action) => {
                action.on_error_with_request_id(
                    request_id,
                    pending.operation_id,
                    code,
                    parameter,
                );
                Dispatch::Delivered
            }
            None => Dispatch::UnknownCorrelation(request_id),
        }
    }

    pub fn on_twinlife_ready(&self) {
        if self.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[on_twinlife_ready]: context ready");
        for action in self.snapshot() {
            action.on_twinlife_ready();
        }
    }

    pub fn on_twinlife_online(&self) {
        self.ready.store(true, Ordering::SeqCst);
        if self.online.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[on_twinlife_online]: channel online");
        for action in self.snapshot() {
            action.on_twinlife_online();
        }
    }

    pub fn on_twinlife_offline(&self) {
        if !self.online.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("[on_twinlife_offline]: channel offline");
        for action in self.snapshot() {
            action.on_twinlife_offline();
        }
    }

    /// Route one transport event.
    pub fn dispatch_event(&self, event: TransportEvent) -> Option<Dispatch> {
        match event {
            TransportEvent::Response {
                request_id,
                payload,
            } => Some(self.on_response(request_id, payload)),
            TransportEvent::Error {
                request_id,
                code,
                parameter,
            } => Some(self.on_error(request_id, code, parameter)),
            TransportEvent::Online => {
                self.on_twinlife_online();
                None
            }
            TransportEvent::Offline => {
                self.on_twinlife_offline();
                None
            }
            TransportEvent::Ready => {
                self.on_twinlife_ready();
                None
            }
        }
    }

    // ─────────────────────────── Timeouts ───────────────────────────

    /// Fire the timeout of every action whose deadline has passed.
    ///
    /// Returns how many actions were timed out.
    pub fn expire_due(&self) -> usize {
        let expired = self.deadlines.pop_expired(self.now());
        let mut fired = 0;
        for id in expired {
            if let Some(action) = self.action(id) {
                if !action.is_stopped() {
                    info!("[expire_due]: {} ({id}) timed out", action.name());
                    action.fire_timeout();
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Single-timer scheduling loop: sleep until the earliest deadline, fire
    /// what expired, re-arm. An earlier insertion wakes the loop early.
    pub async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        info!("[run_scheduler]: timeout scheduler started");
        loop {
            match self.deadlines.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.deadlines.changed() => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            self.expire_due();
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.deadlines.changed() => {}
                    }
                }
            }
        }
        info!("[run_scheduler]: timeout scheduler stopped");
    }

    /// Drain a delivery service subscription into this context.
    pub async fn run_event_pump(
        self: Arc<Self>,
        mut events: UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        info!("[run_event_pump]: transport event pump started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = events.recv() => {
                    match maybe {
                        Some(event) => {
                            self.dispatch_event(event);
                        }
                        None => break,
                    }
                }
            }
        }
        info!("[run_event_pump]: transport event pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use ds::{MemoryDeliveryService, NO_REQUEST_ID};

    use super::*;

    #[tokio::test]
    async fn test_new_request_id_is_untracked() {
        let context = Context::new(
            ContextConfig::default(),
            Arc::new(MemoryDeliveryService::new()),
        );
        let first = context.new_request_id();
        let second = context.new_request_id();

        assert_ne!(first, NO_REQUEST_ID);
        assert!(second > first);
        assert_eq!(context.outstanding_requests(), 0);
        assert_eq!(
            context.on_response(first, Vec::new()),
            Dispatch::UnknownCorrelation(first)
        );
    }
}

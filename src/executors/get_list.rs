use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::action::{OperationId, Payload};
use crate::error::ActionError;
use crate::executor::{ExecutorBehavior, Operations, Step};
use crate::executors::decode_error;

const GET_LIST: OperationId = 1;

/// "Get list of X" read: one request, answered with a JSON array.
///
/// Meant to be run through a
/// [`SingleFlightRegistry`](crate::SingleFlightRegistry) keyed by the
/// operation name, so concurrent readers share one round trip.
pub struct GetListExecutor<E> {
    operation: String,
    payload: Vec<u8>,
    sent: bool,
    entries: Option<Arc<Vec<E>>>,
    _entry: PhantomData<fn() -> E>,
}

impl<E> GetListExecutor<E> {
    pub fn new(operation: &str) -> Self {
        Self::with_payload(operation, Vec::new())
    }

    pub fn with_payload(operation: &str, payload: Vec<u8>) -> Self {
        Self {
            operation: operation.to_string(),
            payload,
            sent: false,
            entries: None,
            _entry: PhantomData,
        }
    }
}

impl<E> ExecutorBehavior for GetListExecutor<E>
where
    E: DeserializeOwned + Send + Sync + 'static,
{
    type Output = Arc<Vec<E>>;

    fn name(&self) -> &str {
        &self.operation
    }

    fn on_operation(&mut self, ops: &mut Operations<'_>) -> Step<Self::Output> {
        if let Some(entries) = &self.entries {
            return Step::Done(entries.clone());
        }
        if !self.sent {
            self.sent = true;
            ops.send(GET_LIST, &self.operation, self.payload.clone());
        }
        Step::Wait
    }

    fn on_response(
        &mut self,
        _operation_id: OperationId,
        payload: Payload,
    ) -> Result<(), ActionError> {
        let entries: Vec<E> = serde_json::from_slice(&payload).map_err(decode_error)?;
        self.entries = Some(Arc::new(entries));
        Ok(())
    }

    fn is_idempotent(&self, _operation_id: OperationId) -> bool {
        true
    }

    fn on_reissue(&mut self, _operation_id: OperationId) {
        self.sent = false;
    }
}

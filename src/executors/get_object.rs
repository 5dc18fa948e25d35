use ds::ErrorCode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::action::{OperationId, Payload};
use crate::error::ActionError;
use crate::executor::{ExecutorBehavior, Operations, Step};
use crate::executors::decode_error;

pub const GET_OBJECT_OPERATION: &str = "get-object";

const GET_OBJECT: OperationId = 1;

/// Deadline-bounded lookup of one object by id.
///
/// Served by the local repository, so it only waits for the context to be
/// ready, not online. A `null` answer fails with `ItemNotFound`.
pub struct GetObjectAction<T> {
    object_id: Uuid,
    sent: bool,
    object: Option<T>,
}

impl<T> GetObjectAction<T> {
    pub fn new(object_id: Uuid) -> Self {
        Self {
            object_id,
            sent: false,
            object: None,
        }
    }

    pub fn object_id(&self) -> Uuid {
        self.object_id
    }
}

impl<T> ExecutorBehavior for GetObjectAction<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        GET_OBJECT_OPERATION
    }

    fn needs_online(&self) -> bool {
        false
    }

    fn on_operation(&mut self, ops: &mut Operations<'_>) -> Step<T> {
        if let Some(object) = self.object.take() {
            return Step::Done(object);
        }
        if !self.sent {
            self.sent = true;
            ops.send(
                GET_OBJECT,
                GET_OBJECT_OPERATION,
                self.object_id.as_bytes().to_vec(),
            );
        }
        Step::Wait
    }

    fn on_response(
        &mut self,
        _operation_id: OperationId,
        payload: Payload,
    ) -> Result<(), ActionError> {
        let object: Option<T> = serde_json::from_slice(&payload).map_err(decode_error)?;
        match object {
            Some(object) => {
                self.object = Some(object);
                Ok(())
            }
            None => Err(ActionError::TransportError {
                code: ErrorCode::ItemNotFound,
                parameter: Some(self.object_id.to_string()),
            }),
        }
    }

    fn is_idempotent(&self, _operation_id: OperationId) -> bool {
        true
    }

    fn on_reissue(&mut self, _operation_id: OperationId) {
        self.sent = false;
    }
}

//! Compound delete of one object.
//!
//! Deleting an object touches several independent places: its twincodes
//! are unbound on the server, pairings are removed, the local object is
//! dropped. Each place is a [`DeleteStep`] with its own bit; the delete
//! succeeds once every applicable step has answered.

use ds::ErrorCode;
use log::debug;
use uuid::Uuid;

use crate::error::{ActionError, FanInError};
use crate::executor::Operations;
use crate::fan_in::{FanInExecutor, FanInJoin, FanInTask, SubOperation, MAX_FAN_IN_BITS};

/// Number of steps a delete can be split into.
pub const DELETE_OBJECT_LAST_STATE_BIT: u32 = MAX_FAN_IN_BITS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStep {
    /// Server-side side effect; never re-sent after a reconnect.
    Remote(String),
    /// Local cleanup; safe to repeat.
    Local(String),
    /// Does not apply to this object; its bit is preset.
    NotApplicable,
}

impl DeleteStep {
    pub fn remote(operation: &str) -> Self {
        DeleteStep::Remote(operation.to_string())
    }

    pub fn local(operation: &str) -> Self {
        DeleteStep::Local(operation.to_string())
    }

    fn operation(&self) -> Option<&str> {
        match self {
            DeleteStep::Remote(op) | DeleteStep::Local(op) => Some(op),
            DeleteStep::NotApplicable => None,
        }
    }
}

/// Single-flight key of the delete of `object_id`.
pub fn delete_key(kind: &str, object_id: &Uuid) -> String {
    format!("delete-{kind}:{object_id}")
}

pub struct DeleteObjectTask {
    name: String,
    object_id: Uuid,
    steps: Vec<DeleteStep>,
}

pub type DeleteObjectExecutor = FanInExecutor<DeleteObjectTask>;

impl DeleteObjectTask {
    /// Build the executor deleting `object_id` through `steps`, step `i`
    /// owning bit `i`.
    pub fn executor(
        kind: &str,
        object_id: Uuid,
        steps: Vec<DeleteStep>,
    ) -> Result<DeleteObjectExecutor, FanInError> {
        if steps.len() > DELETE_OBJECT_LAST_STATE_BIT as usize {
            return Err(FanInError::BitOutOfRange(steps.len() as u32 - 1));
        }
        let mut join = FanInJoin::new(
            steps
                .iter()
                .enumerate()
                .filter(|(_, s)| s.operation().is_some())
                .map(|(bit, _)| bit as u32),
        )?;
        for (bit, step) in steps.iter().enumerate() {
            if *step == DeleteStep::NotApplicable {
                join.skip(bit as u32)?;
            }
        }
        let task = Self {
            name: format!("delete-{kind}"),
            object_id,
            steps,
        };
        Ok(FanInExecutor::new(task, join))
    }

    pub fn object_id(&self) -> Uuid {
        self.object_id
    }
}

impl FanInTask for DeleteObjectTask {
    type Output = Uuid;

    fn name(&self) -> &str {
        &self.name
    }

    fn issue(&mut self, bit: u32, ops: &mut Operations<'_>) -> SubOperation {
        match self.steps.get(bit as usize).and_then(DeleteStep::operation) {
            Some(operation) => {
                ops.send(bit, operation, self.object_id.as_bytes().to_vec());
                SubOperation::Sent
            }
            None => SubOperation::Done,
        }
    }

    fn on_sub_error(
        &mut self,
        bit: u32,
        code: ErrorCode,
        parameter: Option<&str>,
    ) -> Result<(), ActionError> {
        if code == ErrorCode::ItemNotFound {
            debug!("[on_sub_error]: {} step {bit} already gone", self.name);
            return Ok(());
        }
        Err(ActionError::TransportError {
            code,
            parameter: parameter.map(str::to_string),
        })
    }

    fn is_idempotent(&self, bit: u32) -> bool {
        matches!(self.steps.get(bit as usize), Some(DeleteStep::Local(_)))
    }

    fn finish(&mut self) -> Uuid {
        self.object_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_applicable_steps_are_preset() {
        let executor = DeleteObjectTask::executor(
            "contact",
            Uuid::new_v4(),
            vec![
                DeleteStep::remote("unbind-twincode"),
                DeleteStep::NotApplicable,
                DeleteStep::local("delete-object"),
            ],
        )
        .unwrap();
        assert_eq!(executor.join().expected_mask(), 0b111);
        assert_eq!(executor.join().missing(), vec![0, 2]);
    }

    #[test]
    fn test_too_many_steps() {
        let steps = vec![DeleteStep::local("x"); DELETE_OBJECT_LAST_STATE_BIT as usize + 1];
        assert!(matches!(
            DeleteObjectTask::executor("group", Uuid::nil(), steps),
            Err(FanInError::BitOutOfRange(20))
        ));
    }

    #[test]
    fn test_delete_key() {
        let id = Uuid::nil();
        assert_eq!(
            delete_key("contact", &id),
            "delete-contact:00000000-0000-0000-0000-000000000000"
        );
    }
}

//! Actions: deadline-bounded units of asynchronous work.
//!
//! An action is anything the [`Context`](crate::Context) tracks between
//! `start_action` and `finish_action`. The context only sees it through the
//! capability traits defined here:
//!
//! - [`Timeoutable`]: has an optional deadline and can be timed out,
//! - [`Correlatable`]: receives responses and errors routed by request id,
//! - [`ConnectivityAware`]: reacts to the channel going ready/online/offline.
//!
//! [`Executor`](crate::Executor) is the one implementation in this crate;
//! its per-kind behavior is supplied by an
//! [`ExecutorBehavior`](crate::ExecutorBehavior).

use std::fmt::Display;

use ds::{ErrorCode, RequestId};
use tokio::time::Instant;

/// Identifier of a started action, unique within a context.
pub type ActionId = u64;

/// Tag naming which logical step of an executor a request belongs to.
pub type OperationId = u32;

/// Raw response payload as delivered by the channel.
pub type Payload = Vec<u8>;

/// Lifecycle of an executor.
///
/// ```text
/// Created -> Started -> { AwaitingResponse <-> IssuingNextOperation }*
///         -> { Succeeded | Failed | TimedOut | Canceled }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorState {
    Created,
    Started,
    AwaitingResponse,
    IssuingNextOperation,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl ExecutorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorState::Succeeded
                | ExecutorState::Failed
                | ExecutorState::TimedOut
                | ExecutorState::Canceled
        )
    }
}

impl Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ExecutorState::Created => "Created",
            ExecutorState::Started => "Started",
            ExecutorState::AwaitingResponse => "AwaitingResponse",
            ExecutorState::IssuingNextOperation => "IssuingNextOperation",
            ExecutorState::Succeeded => "Succeeded",
            ExecutorState::Failed => "Failed",
            ExecutorState::TimedOut => "TimedOut",
            ExecutorState::Canceled => "Canceled",
        };
        write!(f, "{state}")
    }
}

/// Position of an action in the deadline queue.
///
/// Ordered by deadline, then by insertion sequence so that two actions
/// sharing a deadline always expire in the order they were started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeadlineKey {
    pub deadline: Instant,
    pub seq: u64,
}

pub trait Timeoutable: Send + Sync {
    fn action_id(&self) -> ActionId;

    /// Absolute deadline, `None` when the action never times out.
    fn deadline(&self) -> Option<Instant>;

    /// Called by the scheduler once the deadline has passed.
    fn fire_timeout(&self);
}

pub trait Correlatable: Send + Sync {
    /// A response for `request_id`, already removed from the correlator.
    fn on_response(&self, request_id: RequestId, operation_id: OperationId, payload: Payload);

    /// An error response for `request_id`, already removed from the correlator.
    fn on_error_with_request_id(
        &self,
        request_id: RequestId,
        operation_id: OperationId,
        code: ErrorCode,
        parameter: Option<String>,
    );
}

pub trait ConnectivityAware: Send + Sync {
    /// Local services are usable; the channel may still be offline.
    fn on_twinlife_ready(&self) {}

    fn on_twinlife_online(&self);

    fn on_twinlife_offline(&self);
}

/// Everything the context needs from a live action.
pub trait ManagedAction: Timeoutable + Correlatable + ConnectivityAware {
    fn name(&self) -> &str;

    fn is_stopped(&self) -> bool;

    /// Caller-initiated terminal transition.
    fn cancel(&self);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_deadline_key_orders_by_deadline_then_sequence() {
        let now = Instant::now();
        let early = DeadlineKey {
            deadline: now,
            seq: 9,
        };
        let late = DeadlineKey {
            deadline: now + Duration::from_millis(1),
            seq: 1,
        };
        let tie = DeadlineKey {
            deadline: now,
            seq: 10,
        };
        assert!(early < late);
        assert!(early < tie);
        assert!(tie < late);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutorState::Created.is_terminal());
        assert!(!ExecutorState::AwaitingResponse.is_terminal());
        assert!(ExecutorState::TimedOut.is_terminal());
        assert!(ExecutorState::Canceled.is_terminal());
    }
}

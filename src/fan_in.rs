//! Bitmask fan-in join.
//!
//! A compound executor waits for an a-priori fixed set of independent
//! sub-operations, one bit each. [`FanInJoin`] is the bookkeeping;
//! [`FanInExecutor`] runs a [`FanInTask`] on top of it: every pending bit is
//! issued in parallel and the join is fail-fast.

use ds::ErrorCode;
use log::debug;

use crate::action::{OperationId, Payload};
use crate::error::{ActionError, FanInError};
use crate::executor::{ExecutorBehavior, Operations, Outcome, Step};

/// Widest supported join.
pub const MAX_FAN_IN_BITS: u32 = 20;

/// Effect of a signal on the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Accepted; other bits are still missing.
    Pending,
    /// Accepted and it was the last missing bit. Returned once.
    Completed,
    /// Accepted as the first failure. Returned once.
    Failed,
    /// Duplicate, unknown bit, or the join already reached an outcome.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanInJoin {
    expected: u32,
    accumulated: u32,
    failure: Option<(u32, ActionError)>,
}

fn mask(bit: u32) -> Result<u32, FanInError> {
    if bit >= MAX_FAN_IN_BITS {
        return Err(FanInError::BitOutOfRange(bit));
    }
    Ok(1 << bit)
}

impl FanInJoin {
    /// A join expecting one signal for each of `bits`.
    pub fn new(bits: impl IntoIterator<Item = u32>) -> Result<Self, FanInError> {
        let mut expected = 0;
        for bit in bits {
            expected |= mask(bit)?;
        }
        Ok(Self {
            expected,
            accumulated: 0,
            failure: None,
        })
    }

    /// Mark `bit` as not applicable: it counts as done from the start.
    pub fn skip(&mut self, bit: u32) -> Result<(), FanInError> {
        let m = mask(bit)?;
        self.expected |= m;
        self.accumulated |= m;
        Ok(())
    }

    pub fn expected_mask(&self) -> u32 {
        self.expected
    }

    pub fn accumulated(&self) -> u32 {
        self.accumulated
    }

    /// Every expected bit is set and nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.accumulated == self.expected
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.is_complete() || self.is_failed()
    }

    /// The first failure, as the error delivered to continuations.
    pub fn failure(&self) -> Option<ActionError> {
        self.failure
            .as_ref()
            .map(|(bit, cause)| ActionError::PartialFailure {
                bit: *bit,
                cause: Box::new(cause.clone()),
            })
    }

    /// Whether `bit` is expected and has not signaled yet.
    pub fn is_pending(&self, bit: u32) -> bool {
        match mask(bit) {
            Ok(m) => self.expected & m != 0 && self.accumulated & m == 0,
            Err(_) => false,
        }
    }

    /// Expected bits still missing, lowest first.
    pub fn missing(&self) -> Vec<u32> {
        (0..MAX_FAN_IN_BITS).filter(|b| self.is_pending(*b)).collect()
    }

    pub fn complete(&mut self, bit: u32) -> Signal {
        if self.is_settled() || !self.is_pending(bit) {
            return Signal::Ignored;
        }
        self.accumulated |= 1 << bit;
        if self.accumulated == self.expected {
            Signal::Completed
        } else {
            Signal::Pending
        }
    }

    pub fn fail(&mut self, bit: u32, error: ActionError) -> Signal {
        if self.is_settled() || !self.is_pending(bit) {
            return Signal::Ignored;
        }
        self.failure = Some((bit, error));
        Signal::Failed
    }
}

/// What issuing one sub-operation did.
#[derive(Debug)]
pub enum SubOperation {
    /// A correlated request is in flight for the bit.
    Sent,
    /// Finished synchronously (local work).
    Done,
    Failed(ActionError),
}

/// The per-kind part of a fan-in executor.
///
/// Requests issued for a bit must use the bit as their operation id.
pub trait FanInTask: Send + 'static {
    type Output: Clone + Send + 'static;

    fn name(&self) -> &str;

    fn needs_online(&self) -> bool {
        true
    }

    fn issue(&mut self, bit: u32, ops: &mut Operations<'_>) -> SubOperation;

    fn on_sub_response(&mut self, bit: u32, payload: Payload) -> Result<(), ActionError> {
        let _ = (bit, payload);
        Ok(())
    }

    /// `Ok` tolerates the error and counts the bit as done.
    fn on_sub_error(
        &mut self,
        bit: u32,
        code: ErrorCode,
        parameter: Option<&str>,
    ) -> Result<(), ActionError> {
        let _ = bit;
        Err(ActionError::TransportError {
            code,
            parameter: parameter.map(str::to_string),
        })
    }

    fn is_idempotent(&self, bit: u32) -> bool {
        let _ = bit;
        false
    }

    /// Result once every bit has completed.
    fn finish(&mut self) -> Self::Output;
}

/// Runs a [`FanInTask`] as an [`ExecutorBehavior`].
pub struct FanInExecutor<T: FanInTask> {
    task: T,
    join: FanInJoin,
    issued: u32,
}

impl<T: FanInTask> FanInExecutor<T> {
    pub fn new(task: T, join: FanInJoin) -> Self {
        Self {
            task,
            join,
            issued: 0,
        }
    }

    pub fn join(&self) -> &FanInJoin {
        &self.join
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    fn record(&mut self, bit: u32, result: Result<(), ActionError>) {
        let signal = match result {
            Ok(()) => self.join.complete(bit),
            Err(e) => self.join.fail(bit, e),
        };
        debug!(
            "[record]: {} bit {bit} -> {signal:?} ({:#x}/{:#x})",
            self.task.name(),
            self.join.accumulated(),
            self.join.expected_mask()
        );
    }
}

impl<T: FanInTask> ExecutorBehavior for FanInExecutor<T> {
    type Output = T::Output;

    fn name(&self) -> &str {
        self.task.name()
    }

    fn needs_online(&self) -> bool {
        self.task.needs_online()
    }

    fn on_operation(&mut self, ops: &mut Operations<'_>) -> Step<T::Output> {
        for bit in self.join.missing() {
            if self.join.is_failed() {
                break;
            }
            if self.issued & (1 << bit) != 0 {
                continue;
            }
            self.issued |= 1 << bit;
            match self.task.issue(bit, ops) {
                SubOperation::Sent => {}
                SubOperation::Done => self.record(bit, Ok(())),
                SubOperation::Failed(e) => self.record(bit, Err(e)),
            }
        }

        if let Some(error) = self.join.failure() {
            Step::Fail(error)
        } else if self.join.is_complete() {
            Step::Done(self.task.finish())
        } else {
            Step::Wait
        }
    }

    fn on_response(
        &mut self,
        operation_id: OperationId,
        payload: Payload,
    ) -> Result<(), ActionError> {
        if self.join.is_pending(operation_id) {
            let result = self.task.on_sub_response(operation_id, payload);
            self.record(operation_id, result);
        }
        Ok(())
    }

    fn on_error(
        &mut self,
        operation_id: OperationId,
        code: ErrorCode,
        parameter: Option<&str>,
    ) -> Result<(), ActionError> {
        if self.join.is_pending(operation_id) {
            let result = self.task.on_sub_error(operation_id, code, parameter);
            self.record(operation_id, result);
        }
        Ok(())
    }

    fn is_idempotent(&self, operation_id: OperationId) -> bool {
        self.task.is_idempotent(operation_id)
    }

    fn on_reissue(&mut self, operation_id: OperationId) {
        if operation_id < MAX_FAN_IN_BITS {
            self.issued &= !(1 << operation_id);
        }
    }

    fn on_finish(&mut self, outcome: &Outcome<T::Output>) {
        if let Err(e) = outcome {
            debug!(
                "[on_finish]: {} stopped with bits {:?} missing: {e}",
                self.task.name(),
                self.join.missing()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_on_last_missing_bit() {
        let mut join = FanInJoin::new([0, 1, 2]).unwrap();
        assert_eq!(join.expected_mask(), 0b111);
        assert_eq!(join.complete(1), Signal::Pending);
        assert_eq!(join.complete(0), Signal::Pending);
        assert_eq!(join.missing(), vec![2]);
        assert_eq!(join.complete(2), Signal::Completed);
        assert!(join.is_complete());
        assert_eq!(join.complete(2), Signal::Ignored);
    }

    #[test]
    fn test_duplicate_bit_is_not_counted_twice() {
        let mut join = FanInJoin::new([0, 1]).unwrap();
        assert_eq!(join.complete(0), Signal::Pending);
        assert_eq!(join.complete(0), Signal::Ignored);
        assert_eq!(join.accumulated(), 0b01);
        assert!(!join.is_complete());
    }

    #[test]
    fn test_first_failure_wins() {
        let mut join = FanInJoin::new([0, 1, 2]).unwrap();
        join.complete(1);
        join.complete(0);
        assert_eq!(join.fail(2, ActionError::Timeout), Signal::Failed);
        assert_eq!(join.complete(2), Signal::Ignored);
        assert_eq!(
            join.fail(2, ActionError::Canceled),
            Signal::Ignored
        );
        assert_eq!(
            join.failure(),
            Some(ActionError::PartialFailure {
                bit: 2,
                cause: Box::new(ActionError::Timeout)
            })
        );
        assert!(!join.is_complete());
    }

    #[test]
    fn test_skipped_bits_are_preset() {
        let mut join = FanInJoin::new([0, 1]).unwrap();
        join.skip(3).unwrap();
        assert_eq!(join.expected_mask(), 0b1011);
        assert!(!join.is_pending(3));
        join.complete(0);
        assert_eq!(join.complete(1), Signal::Completed);
    }

    #[test]
    fn test_unknown_and_out_of_range_bits() {
        assert_eq!(
            FanInJoin::new([MAX_FAN_IN_BITS]),
            Err(FanInError::BitOutOfRange(MAX_FAN_IN_BITS))
        );
        let mut join = FanInJoin::new([0]).unwrap();
        assert_eq!(join.complete(5), Signal::Ignored);
        assert_eq!(join.complete(31), Signal::Ignored);
        assert_eq!(join.complete(0), Signal::Completed);
    }
}

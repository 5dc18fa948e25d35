use ds::ErrorCode;

use crate::fan_in::MAX_FAN_IN_BITS;

/// Terminal failure delivered to every continuation of an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("Deadline elapsed before a terminal response")]
    Timeout,
    #[error("Transport error {code}{}", parameter_suffix(.parameter))]
    TransportError {
        code: ErrorCode,
        parameter: Option<String>,
    },
    #[error("Canceled by caller")]
    Canceled,
    #[error("Sub-operation {bit} failed: {cause}")]
    PartialFailure { bit: u32, cause: Box<ActionError> },
}

impl ActionError {
    pub fn transport(code: ErrorCode) -> Self {
        ActionError::TransportError {
            code,
            parameter: None,
        }
    }

    /// Error code of a transport failure, looking through partial failures.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ActionError::TransportError { code, .. } => Some(*code),
            ActionError::PartialFailure { cause, .. } => cause.error_code(),
            _ => None,
        }
    }
}

fn parameter_suffix(parameter: &Option<String>) -> String {
    parameter
        .as_deref()
        .map(|p| format!(": {p}"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FanInError {
    #[error("Bit {0} is outside the {MAX_FAN_IN_BITS}-bit fan-in width")]
    BitOutOfRange(u32),
}

/// Errors raised while configuring or wiring a [`Context`](crate::Context).
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },
}

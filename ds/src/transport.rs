//! Transport-agnostic envelopes + delivery service interface.
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::DeliveryServiceError;

/// Correlation token carried by a request and echoed by its response.
pub type RequestId = i64;

/// Request id meaning "no correlation expected".
pub const NO_REQUEST_ID: RequestId = 0;

/// Application error codes carried by an explicit error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    BadRequest,
    CanNotConnect,
    ItemNotFound,
    NoPermission,
    ServiceUnavailable,
    LimitReached,
    Expired,
    NotAuthorized,
    TwinlifeOffline,
    LibraryError,
    /// A code without a named variant. Never holds 1..=10: build it with
    /// [`ErrorCode::from_code`], which is also how the wire form decodes.
    Other(i32),
}

impl ErrorCode {
    /// Stable numeric value used in logs and on the wire.
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::BadRequest => 1,
            ErrorCode::CanNotConnect => 2,
            ErrorCode::ItemNotFound => 3,
            ErrorCode::NoPermission => 4,
            ErrorCode::ServiceUnavailable => 5,
            ErrorCode::LimitReached => 6,
            ErrorCode::Expired => 7,
            ErrorCode::NotAuthorized => 8,
            ErrorCode::TwinlifeOffline => 9,
            ErrorCode::LibraryError => 10,
            ErrorCode::Other(code) => *code,
        }
    }

    /// Inverse of [`ErrorCode::code`]; unknown values map to `Other`, named
    /// values always map to their variant.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ErrorCode::BadRequest,
            2 => ErrorCode::CanNotConnect,
            3 => ErrorCode::ItemNotFound,
            4 => ErrorCode::NoPermission,
            5 => ErrorCode::ServiceUnavailable,
            6 => ErrorCode::LimitReached,
            7 => ErrorCode::Expired,
            8 => ErrorCode::NotAuthorized,
            9 => ErrorCode::TwinlifeOffline,
            10 => ErrorCode::LibraryError,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::from_code(code)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::BadRequest => "BadRequest",
            ErrorCode::CanNotConnect => "CanNotConnect",
            ErrorCode::ItemNotFound => "ItemNotFound",
            ErrorCode::NoPermission => "NoPermission",
            ErrorCode::ServiceUnavailable => "ServiceUnavailable",
            ErrorCode::LimitReached => "LimitReached",
            ErrorCode::Expired => "Expired",
            ErrorCode::NotAuthorized => "NotAuthorized",
            ErrorCode::TwinlifeOffline => "TwinlifeOffline",
            ErrorCode::LibraryError => "LibraryError",
            ErrorCode::Other(code) => return write!(f, "Other({code})"),
        };
        write!(f, "{name}")
    }
}

/// A correlated request that should be sent over the shared channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub request_id: RequestId,
    /// Name of the remote operation, e.g. `"get-spaces"`.
    pub operation: String,
    pub payload: Vec<u8>,
}

impl OutboundRequest {
    pub fn new(request_id: RequestId, operation: &str, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            operation: operation.to_string(),
            payload,
        }
    }
}

/// Everything the channel reports back to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Success payload for a request.
    Response {
        request_id: RequestId,
        payload: Vec<u8>,
    },
    /// Explicit error response for a request.
    Error {
        request_id: RequestId,
        code: ErrorCode,
        parameter: Option<String>,
    },
    /// The channel is connected and can carry requests.
    Online,
    /// The channel lost its connection.
    Offline,
    /// Local services are initialized (no connectivity implied).
    Ready,
}

pub trait DeliveryService: Send + Sync + 'static {
    /// Hand a request to the channel.
    ///
    /// `Err` means the request was not sent; no response will ever arrive
    /// for its request id.
    fn send(&self, request: OutboundRequest) -> Result<(), DeliveryServiceError>;

    /// Subscribe to transport events.
    ///
    /// Each call creates a new channel and registers its sender internally.
    /// Senders are pruned when the corresponding receiver is dropped, but only
    /// during the next event dispatch.
    fn subscribe(&self) -> UnboundedReceiver<TransportEvent>;
}

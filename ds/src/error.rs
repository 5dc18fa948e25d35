/// Errors originating from the delivery service layer.
///
/// A `DeliveryServiceError` returned by `send` means the request never left
/// the process; it is not an error response from the remote side.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryServiceError {
    #[error("Channel is offline, request {0} not sent")]
    Offline(i64),
    #[error("Request {0} already sent")]
    DuplicateRequest(i64),

    #[error("An unknown error occurred: {0}")]
    Other(anyhow::Error),
}

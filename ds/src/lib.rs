//! Delivery service: the transport-facing side of the orchestration core.
//!
//! The core never talks to the network itself. It hands [`OutboundRequest`]s
//! tagged with a request id to a [`DeliveryService`] and receives
//! [`TransportEvent`]s back (responses, error responses, connectivity
//! changes) through a subscription channel.

mod error;
mod memory;
mod transport;

pub use error::DeliveryServiceError;
pub use memory::{AutoResponder, MemoryDeliveryService};
pub use transport::{
    DeliveryService, ErrorCode, OutboundRequest, RequestId, TransportEvent, NO_REQUEST_ID,
};

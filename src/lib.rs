//! Action/executor orchestration core.
//!
//! Turns asynchronous, callback-driven operations over one shared channel
//! into deadline-bounded, correlated, single-flight and fan-in-joined units
//! of work. The channel itself is the [`ds::DeliveryService`] collaborator.

pub mod action;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod context;
pub mod correlator;
pub mod deadline_queue;
pub mod error;
pub mod executor;
pub mod executors;
pub mod fan_in;
pub mod registry;

pub use action::{
    ActionId, ConnectivityAware, Correlatable, ExecutorState, ManagedAction, OperationId,
    Payload, Timeoutable,
};
pub use bootstrap::{bootstrap_core, bootstrap_core_from_env, Bootstrap, BootstrapConfig};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{ContextConfig, DEFAULT_TIMEOUT};
pub use context::{Context, Dispatch};
pub use correlator::{Correlator, PendingRequest};
pub use deadline_queue::DeadlineQueue;
pub use error::{ActionError, ContextError, FanInError};
pub use executor::{Completion, Executor, ExecutorBehavior, Operations, Outcome, Step};
pub use fan_in::{FanInExecutor, FanInJoin, FanInTask, Signal, SubOperation, MAX_FAN_IN_BITS};
pub use registry::SingleFlightRegistry;

pub use ds::{
    DeliveryService, DeliveryServiceError, ErrorCode, MemoryDeliveryService, OutboundRequest,
    RequestId, TransportEvent, NO_REQUEST_ID,
};

//! Concrete executors built on the runtime.

mod delete_object;
mod get_list;
mod get_object;

pub use delete_object::{
    delete_key, DeleteObjectExecutor, DeleteObjectTask, DeleteStep, DELETE_OBJECT_LAST_STATE_BIT,
};
pub use get_list::GetListExecutor;
pub use get_object::{GetObjectAction, GET_OBJECT_OPERATION};

use ds::ErrorCode;

use crate::error::ActionError;

/// Map a payload decoding failure to the error delivered to continuations.
pub(crate) fn decode_error(e: serde_json::Error) -> ActionError {
    ActionError::TransportError {
        code: ErrorCode::LibraryError,
        parameter: Some(e.to_string()),
    }
}

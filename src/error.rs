//! Service-layer error umbrella.

use thiserror::Error;

use crate::dao::http::ApiError;
use crate::leader::medium::LeaseError;
use crate::state::runtime::RuntimeError;
use crate::transport::broker::TransportError;

/// Errors that can occur in service-layer operations. Every variant is
/// caught at its origin and converted to a log line, a transient notice or a
/// stored error field; none of them halts the event loop.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A HTTP collaborator call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The lease medium failed.
    #[error(transparent)]
    Lease(#[from] LeaseError),
    /// A runtime operation was rejected.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

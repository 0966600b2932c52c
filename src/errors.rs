//! Error types for the pooled HTTP client

use thiserror::Error;

/// Errors surfaced directly to callers of the facade.
///
/// Network-level failures never appear here: they are absorbed into the
/// returned [`RequestResult`](crate::RequestResult) as sentinel status codes.
/// The only error a caller can receive is a malformed-input rejection raised
/// before any network work is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{0} must not be empty")]
    InvalidArgument(&'static str),
}

/// Errors produced while checking a connection out of the pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(std::time::Duration),

    #[error("connection pool is shut down")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Classified transport outcomes, matched explicitly by the result
/// normalizer instead of relying on error-downcast ordering.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimedOut(std::time::Duration),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("no response within {0:?}")]
    ResponseTimedOut(std::time::Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

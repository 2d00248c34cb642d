//! Error types for webcli-core
//!
//! Every variant maps to a stable, user-safe message; internal detail
//! (paths, OS error strings) is logged at the point of failure and never
//! reaches the client.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Bad credentials. The reason (unknown user vs. wrong password) is
    /// deliberately not distinguished.
    #[error("authentication failed")]
    AuthFailure,

    /// The acting role lacks permission for the operation
    #[error("permission denied: {0}")]
    Denied(String),

    /// Input failed a validation predicate; the message is user-facing
    #[error("{0}")]
    Rejected(String),

    /// An atomic store write failed; the original file is preserved
    #[error("could not save changes")]
    Persistence(String),

    /// The connection is gone; fatal to the session
    #[error("connection closed")]
    Transport,

    /// Runner error from the tools layer
    #[error(transparent)]
    Tool(#[from] webcli_tools::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for webcli-tools

use thiserror::Error;

/// Runner error type
#[derive(Debug, Error)]
pub enum Error {
    /// Arguments failed whitelist validation
    #[error("invalid arguments: {0}")]
    Rejected(String),

    /// The session's foreground-job slot is already occupied
    #[error("a job is already running")]
    Busy,

    /// The external tool could not be started
    #[error("failed to launch {0}")]
    Launch(String),

    /// The external tool did not finish within the allowed time
    #[error("timeout after {0}s")]
    Timeout(u64),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

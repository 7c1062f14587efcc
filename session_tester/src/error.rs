use std::path::PathBuf;

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a run.
///
/// Network and protocol failures of individual sessions are *not* represented
/// here: they are recorded as transactions and the session is aborted.
/// Checker failures are not represented either: they become failed
/// [`CheckResult`](crate::CheckResult)s.
#[derive(Error, Debug)]
pub enum Error {
    /// A test definition is invalid: duplicate names, empty name or
    /// expectation, unsupported checker shape.
    #[error("configuration error: {0}")]
    Config(String),

    /// Fewer sessions could be loaded than the check phase requires.
    #[error("not enough sessions for {label}: expected {expected}, found {found}")]
    Shortfall {
        label: String,
        expected: usize,
        found: usize,
    },

    /// A persisted session file could not be used.
    #[error("malformed session file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The id allocator lock could not be taken in time.
    #[error("timed out waiting for the id lock of {label}")]
    LockTimeout { label: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A blocking or worker task could not be joined.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

//! textpop Error Types
//!
//! Centralized error handling for the selection daemon.

use thiserror::Error;

/// Central error type for textpop
#[derive(Error, Debug)]
pub enum PopError {
    #[error("capture backend error: {0}")]
    Capture(String),

    #[error("clipboard error: {0}")]
    Clipboard(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("action error: {0}")]
    Action(String),

    #[error("chat transport error: {0}")]
    Chat(String),

    #[error("input device error: {0}")]
    Input(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for textpop operations
pub type PopResult<T> = Result<T, PopError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for PopError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PopError::Lock(err.to_string())
    }
}

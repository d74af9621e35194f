//! Error taxonomy for the chatsql system
//!
//! One variant per failure domain named in the error handling design
//! (§7): validation, upstream provider failures, missing entities,
//! permission denial, deadline exhaustion, and a catch-all internal
//! variant for anything unexpected.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum ChatSqlError {
    /// Malformed request or disallowed SQL.
    #[error("validation error: {0}")]
    Validation(String),

    /// The LLM, embedder, or query executor failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Unknown conversation, message, or knowledge entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Tool denied by the permission manager.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The agent loop's wall-clock budget was exhausted.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Durable store failure.
    #[error("database error: {0}")]
    Database(String),

    /// I/O failure (artifact store, config loading).
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization failure.
    #[error("serialization error: {source}")]
    Serialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other unexpected condition; logged with stack context and
    /// surfaced as a generic error event. The stream is still terminated
    /// cleanly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ChatSqlError {
    fn from(error: serde_json::Error) -> Self {
        ChatSqlError::Serialization {
            source: Box::new(error),
        }
    }
}

impl From<anyhow::Error> for ChatSqlError {
    fn from(error: anyhow::Error) -> Self {
        ChatSqlError::Internal(error.to_string())
    }
}

/// Result type alias for the chatsql crate family.
pub type Result<T> = std::result::Result<T, ChatSqlError>;

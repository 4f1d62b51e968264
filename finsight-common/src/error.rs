//! Common error types for finsight

use thiserror::Error;

/// Common result type for finsight operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the finsight crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object storage operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Job queue operation error
    #[error("Queue error: {0}")]
    Queue(String),

    /// An external service call failed (vision, language model)
    #[error("Upstream error from {service}: {detail}")]
    Upstream { service: String, detail: String },

    /// Structured data from an external boundary failed to parse.
    /// Carries a snippet of the offending text; redelivery would
    /// reproduce the same failure, so callers treat this as terminal.
    #[error("Parse error ({context}): {raw}")]
    Parse { context: String, raw: String },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `Parse` error, truncating the raw text to a loggable snippet.
    pub fn parse(context: impl Into<String>, raw: &str) -> Self {
        const MAX_RAW: usize = 200;
        let mut snippet: String = raw.chars().take(MAX_RAW).collect();
        if raw.chars().count() > MAX_RAW {
            snippet.push_str("...");
        }
        Error::Parse {
            context: context.into(),
            raw: snippet,
        }
    }

    /// Build an `Upstream` error for a named external service.
    pub fn upstream(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Upstream {
            service: service.into(),
            detail: detail.into(),
        }
    }

    /// True when redelivering the same input would reproduce the failure.
    /// Queue handlers drop these instead of nacking.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. } | Error::InvalidInput(_) | Error::NotFound(_)
        )
    }
}

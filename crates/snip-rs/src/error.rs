//! Error type shared by every snip-rs component.
//!
//! Most of these never reach a caller: pruning degrades to "leave the request
//! alone" at the smallest scope that can absorb the failure. They exist so the
//! places that *do* propagate (persistence, host accessors, strategies, tool
//! argument validation) have something typed to log.

use thiserror::Error;

/// Errors raised by snip-rs.
#[derive(Error, Debug)]
pub enum SnipError {
    /// A request body or transcript could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Saving or restoring session state failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The host's session accessor failed or is unavailable.
    #[error("host error: {0}")]
    Host(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A pruning strategy failed; the whole pass is abandoned.
    #[error("strategy '{strategy}' failed: {reason}")]
    Strategy { strategy: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    /// Tool arguments did not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SnipError>;

impl From<reqwest::Error> for SnipError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

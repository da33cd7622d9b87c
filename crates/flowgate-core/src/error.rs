// Error taxonomy shared across the flowgate crates

use thiserror::Error;

use crate::execution::ExecutionStatus;

/// Result type alias for flowgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the trigger subsystem, the execution engine and the
/// persistence layer. Each variant fixes a distinct recovery policy; retry
/// logic reads the tag instead of matching on message text.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid workflow, node or trigger configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credential missing or rejected by the provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authenticated but not allowed
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Upstream rate limit hit
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transient failure (5xx, timeout, connect)
    #[error("Temporary failure: {0}")]
    Temporary(String),

    /// Non-retryable upstream failure
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Execution state machine violation; indicates a bug
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// Trigger lifecycle or dispatch failure
    #[error("Trigger error: {0}")]
    Trigger(String),

    /// Persistence failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Entity lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Error::Authentication(msg.into())
    }

    /// Create a temporary (retryable) error
    pub fn temporary(msg: impl Into<String>) -> Self {
        Error::Temporary(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Error::Permanent(msg.into())
    }

    /// Create a trigger error
    pub fn trigger(msg: impl Into<String>) -> Self {
        Error::Trigger(msg.into())
    }

    /// Create a repository error
    pub fn repository(msg: impl Into<String>) -> Self {
        Error::Repository(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether a retry policy may re-attempt the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Temporary(_))
    }
}

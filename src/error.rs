//! Error types for the reply scheduler.

use uuid::Uuid;

/// Top-level error type for the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Sending-rule registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule {id} not found")]
    NotFound { id: Uuid },

    #[error("Invalid patch for rule {id}: {reason}")]
    InvalidPatch { id: Uuid, reason: String },
}

/// Message transport errors.
///
/// The dispatch worker treats any `Err` the same as `Ok(false)`: a
/// transient failure that goes through the retry/backoff path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send to {recipient} failed: {reason}")]
    SendFailed { recipient: String, reason: String },

    #[error("Transport connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport rate limited")]
    RateLimited,
}

/// Result type alias for the scheduler.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types shared across the runtime.
//!
//! None of these halt the game. The worst outcome is a score that was not
//! recorded, and that is always reported to the host.

use thiserror::Error;

/// Why the session manager is not ready.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no usable session: missing {missing}")]
    Unavailable { missing: &'static str },

    #[error("session expired at {expired_at}")]
    Expired {
        expired_at: chrono::DateTime<chrono::Utc>,
    },
}

/// Failure delivering a message to the host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host channel closed")]
    Closed,

    #[error("no native handler registered for {0}")]
    NoHandler(String),

    #[error("failed to encode host message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure talking to the score API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),
}

/// Invalid runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

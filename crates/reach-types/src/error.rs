//! Shared error types for agent-reach.

use thiserror::Error;

/// Top-level error type shared by every agent-reach crate.
#[derive(Error, Debug)]
pub enum ReachError {
    /// The configured secret key could not be parsed.
    #[error("Invalid secret key: {0}")]
    InvalidKey(String),

    /// A peer identifier was neither 64 hex characters nor an npub.
    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    /// No secret key was configured.
    #[error("No identity configured (set [identity] secret_key or {0})")]
    MissingIdentity(String),

    /// An event could not be built or parsed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// NIP-04 encryption or decryption failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A relay operation failed.
    #[error("Relay error: {0}")]
    Relay(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The service has not been started (or was stopped).
    #[error("agent-reach service not running")]
    NotRunning,

    /// Invalid user input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for ReachError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Alias for Result with ReachError.
pub type ReachResult<T> = Result<T, ReachError>;

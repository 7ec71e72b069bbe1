//! Wire-level errors.

use reach_types::ReachError;
use thiserror::Error;

/// Errors from encoding, decoding or relay transport.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed event: {0}")]
    Malformed(String),
    #[error("Wrong event kind: expected {expected}, got {actual}")]
    WrongKind { expected: u16, actual: u16 },
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Relay {url}: {reason}")]
    Relay { url: String, reason: String },
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("No relays configured")]
    NoRelays,
}

pub type WireResult<T> = Result<T, WireError>;

impl From<WireError> for ReachError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Encryption(msg) => ReachError::Encryption(msg),
            WireError::Relay { .. } | WireError::Timeout(_) | WireError::NoRelays => {
                ReachError::Relay(e.to_string())
            }
            other => ReachError::Codec(other.to_string()),
        }
    }
}

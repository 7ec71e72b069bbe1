//! Heartbeats: short-lived liveness signals.

use crate::error::ReachError;
use serde::{Deserialize, Serialize};

/// Advertised availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Available,
    Busy,
    /// Offline or under maintenance. Never counts as online.
    Maintenance,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Available => write!(f, "available"),
            Status::Busy => write!(f, "busy"),
            Status::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(Status::Available),
            "busy" => Ok(Status::Busy),
            "maintenance" | "offline" => Ok(Status::Maintenance),
            other => Err(ReachError::Codec(format!("unknown status: {other}"))),
        }
    }
}

/// A heartbeat as observed on the relay network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    /// Author public key, lowercase hex.
    pub pubkey: String,
    /// Card id the heartbeat links to (`d` tag).
    pub card_id: String,
    pub status: Status,
    /// Event `created_at`, unix seconds.
    pub created_at: u64,
    pub event_id: String,
}

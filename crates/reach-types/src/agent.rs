//! The merged agent view: a service card plus its latest heartbeat.

use crate::card::ServiceCard;
use crate::heartbeat::{Heartbeat, Status};
use serde::{Deserialize, Serialize};

/// Maximum heartbeat age (seconds) still counted as online.
pub const LIVENESS_WINDOW_SECS: u64 = 900;

/// Whether an agent with this latest heartbeat is online at `now`.
///
/// Pure function of `(heartbeat, now)`: liveness decays with elapsed time
/// alone, so callers must evaluate it per snapshot rather than cache it.
pub fn is_online(heartbeat: Option<&Heartbeat>, now: u64) -> bool {
    match heartbeat {
        Some(hb) => {
            now.saturating_sub(hb.created_at) < LIVENESS_WINDOW_SECS
                && hb.status != Status::Maintenance
        }
        None => false,
    }
}

/// Read-only snapshot of one remote agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub card: ServiceCard,
    pub heartbeat: Option<Heartbeat>,
    pub is_online: bool,
    /// Timestamp of the latest heartbeat, unix seconds.
    pub last_seen: Option<u64>,
}

impl Agent {
    /// Build a snapshot evaluated at `now`.
    pub fn at(card: ServiceCard, heartbeat: Option<Heartbeat>, now: u64) -> Self {
        let is_online = is_online(heartbeat.as_ref(), now);
        let last_seen = heartbeat.as_ref().map(|hb| hb.created_at);
        Self {
            card,
            heartbeat,
            is_online,
            last_seen,
        }
    }

    pub fn pubkey(&self) -> &str {
        &self.card.pubkey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hb(status: Status, created_at: u64) -> Heartbeat {
        Heartbeat {
            pubkey: "ab".repeat(32),
            card_id: "abababab-v1".to_string(),
            status,
            created_at,
            event_id: "00".repeat(32),
        }
    }

    #[test]
    fn test_liveness_window_edges() {
        let now = 1_700_000_000;
        assert!(is_online(Some(&hb(Status::Available, now - 899)), now));
        assert!(!is_online(Some(&hb(Status::Available, now - 900)), now));
        assert!(!is_online(Some(&hb(Status::Available, now - 901)), now));
    }

    #[test]
    fn test_busy_counts_as_online() {
        let now = 1_700_000_000;
        assert!(is_online(Some(&hb(Status::Busy, now - 10)), now));
    }

    #[test]
    fn test_maintenance_is_never_online() {
        let now = 1_700_000_000;
        assert!(!is_online(Some(&hb(Status::Maintenance, now)), now));
    }

    #[test]
    fn test_no_heartbeat_is_offline() {
        assert!(!is_online(None, 1_700_000_000));
    }

    #[test]
    fn test_future_heartbeat_counts_as_fresh() {
        let now = 1_700_000_000;
        assert!(is_online(Some(&hb(Status::Available, now + 30)), now));
    }
}

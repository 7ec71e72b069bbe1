//! DM cursor and processed-id persistence.

use crate::json_file::{read_json, write_json_atomic};
use crate::ledger::{DedupLedger, DEFAULT_LEDGER_CAPACITY};
use reach_types::ReachResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// How far back a fresh cursor starts, in seconds.
pub const FRESH_CURSOR_LOOKBACK_SECS: u64 = 120;

/// On-disk layout of `dm-listener-state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmState {
    /// Newest `created_at` of a delivered DM, unix seconds.
    pub last_seen_at: u64,
    /// Processed event ids, oldest first.
    #[serde(default)]
    pub seen_ids: Vec<String>,
}

impl DmState {
    /// State for a first run at `now`.
    pub fn fresh(now: u64) -> Self {
        Self {
            last_seen_at: now.saturating_sub(FRESH_CURSOR_LOOKBACK_SECS),
            seen_ids: Vec::new(),
        }
    }

    pub fn ledger(&self) -> DedupLedger {
        DedupLedger::from_ids(self.seen_ids.iter().cloned(), DEFAULT_LEDGER_CAPACITY)
    }
}

#[derive(Debug)]
pub struct DmStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DmStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self, now: u64) -> DmState {
        read_json(&self.path)
            .await
            .unwrap_or_else(|| DmState::fresh(now))
    }

    /// Save, keeping only the newest processed ids.
    pub async fn save(&self, state: &DmState) -> ReachResult<()> {
        let _guard = self.write_lock.lock().await;
        let skip = state.seen_ids.len().saturating_sub(DEFAULT_LEDGER_CAPACITY);
        let capped = DmState {
            last_seen_at: state.last_seen_at,
            seen_ids: state.seen_ids[skip..].to_vec(),
        };
        write_json_atomic(&self.path, &capped).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = DmStateStore::new(dir.path().join("dm-listener-state.json"));
        let state = store.load(1_000_000).await;
        assert_eq!(state.last_seen_at, 1_000_000 - 120);
        assert!(state.seen_ids.is_empty());
    }

    #[tokio::test]
    async fn test_save_caps_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DmStateStore::new(dir.path().join("dm-listener-state.json"));
        let state = DmState {
            last_seen_at: 42,
            seen_ids: (0..700).map(|i| format!("e{i}")).collect(),
        };
        store.save(&state).await.unwrap();

        let loaded = store.load(0).await;
        assert_eq!(loaded.last_seen_at, 42);
        assert_eq!(loaded.seen_ids.len(), 500);
        assert_eq!(loaded.seen_ids[0], "e200");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["lastSeenAt"], 42);
        assert!(raw["seenIds"].is_array());
    }
}

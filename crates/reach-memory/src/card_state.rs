//! Persistence of the operator's own card state.

use crate::json_file::{read_json, write_json_atomic};
use reach_types::{LocalCardState, ReachResult};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

/// Loads and saves [`LocalCardState`]. Concurrent saves are serialized.
#[derive(Debug)]
pub struct CardStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CardStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or defaults when nothing usable is on disk.
    pub async fn load(&self) -> LocalCardState {
        match read_json::<LocalCardState>(&self.path).await {
            Some(state) => state,
            None => {
                info!(path = %self.path.display(), "No saved card state, using defaults");
                LocalCardState::default()
            }
        }
    }

    pub async fn save(&self, state: &LocalCardState) -> ReachResult<()> {
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.path, state).await
    }
}

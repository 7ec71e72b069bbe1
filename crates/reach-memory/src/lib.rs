//! Durable local state for agent-reach.
//!
//! Every store is a single JSON file under the configured state directory.
//! Files are safe to delete: a missing or corrupt file loads as defaults.
//!
//! - **CardStateStore**: the operator's own card (`service-card.json`)
//! - **DmStateStore**: DM cursor and processed ids (`dm-listener-state.json`)
//! - **DedupLedger**: bounded, ordered set of processed event ids

pub mod card_state;
pub mod dm_state;
pub mod json_file;
pub mod ledger;

pub use card_state::CardStateStore;
pub use dm_state::{DmState, DmStateStore};
pub use ledger::DedupLedger;

use std::path::{Path, PathBuf};

/// File name of the local card state.
pub const CARD_STATE_FILE: &str = "service-card.json";
/// File name of the DM cursor and dedup state.
pub const DM_STATE_FILE: &str = "dm-listener-state.json";

/// Root of the on-disk state.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn card_store(&self) -> CardStateStore {
        CardStateStore::new(self.root.join(CARD_STATE_FILE))
    }

    pub fn dm_store(&self) -> DmStateStore {
        DmStateStore::new(self.root.join(DM_STATE_FILE))
    }
}

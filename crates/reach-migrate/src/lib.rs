//! One-shot upgrade from the legacy OpenClaw plugin setup.
//!
//! Reads the host's `openclaw.json` (JSON5), pulls the Nostr channel
//! settings the plugin used to borrow, and writes an agent-reach
//! `config.toml`. Previously persisted card and DM state files can be
//! carried over as well since their shape is unchanged.

pub mod openclaw;
pub mod report;

pub use report::{ItemKind, MigrationReport};

use std::path::PathBuf;

/// Options for running a migration.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Path to the legacy `openclaw.json`.
    pub source_config: PathBuf,
    /// Legacy plugin state directory holding `service-card.json` and
    /// `dm-listener-state.json`, if any.
    pub source_state_dir: Option<PathBuf>,
    /// agent-reach home; `config.toml` is written here.
    pub target_dir: PathBuf,
    /// Where state files are copied to. Defaults to `<target_dir>/state`.
    pub target_state_dir: Option<PathBuf>,
    /// If true, only report what would be done without making changes.
    pub dry_run: bool,
}

/// Run a migration with the given options.
pub fn run_migration(options: &MigrateOptions) -> Result<MigrationReport, MigrateError> {
    openclaw::migrate(options)
}

/// Errors that can occur during migration.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("Source config not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("Failed to parse config: {0}")]
    ConfigParse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5Parse(String),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

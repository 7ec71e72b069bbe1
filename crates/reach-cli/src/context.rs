//! Shared setup for single-shot commands: config, identity, relays, runtime.

use crate::ui;
use reach_kernel::config::{load_config, resolve_identity};
use reach_kernel::Publisher;
use reach_memory::StateDir;
use reach_types::{Identity, ReachConfig};
use reach_wire::{RelayPool, WsRelayPool};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Print an error with a suggested fix and exit.
pub(crate) fn die(msg: impl Display, fix: &str) -> ! {
    ui::error_with_fix(&msg.to_string(), fix);
    std::process::exit(1);
}

pub(crate) fn config(path: Option<PathBuf>) -> ReachConfig {
    match load_config(path.as_deref()) {
        Ok(c) => c,
        Err(e) => die(e, "Check your config.toml syntax"),
    }
}

pub(crate) fn identity(config: &ReachConfig) -> Identity {
    match resolve_identity(config) {
        Ok(id) => id,
        Err(e) => die(
            e,
            "Set AGENT_REACH_SECRET_KEY or identity.secret_key in ~/.agent-reach/config.toml",
        ),
    }
}

pub(crate) fn pool(config: &ReachConfig) -> Arc<dyn RelayPool> {
    match WsRelayPool::new(
        config.resolved_relays(),
        Duration::from_secs(config.relays.publish_timeout_secs),
    ) {
        Ok(p) => Arc::new(p),
        Err(e) => die(e, "Check relays.urls in your config (ws:// or wss://)"),
    }
}

pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => die(e, "Could not start the async runtime"),
    }
}

pub(crate) fn state_dir(config: &ReachConfig) -> StateDir {
    StateDir::new(config.resolved_state_dir())
}

/// Everything a publishing command needs.
pub(crate) struct Session {
    pub config: ReachConfig,
    pub pool: Arc<dyn RelayPool>,
    pub publisher: Publisher,
}

impl Session {
    pub fn open(path: Option<PathBuf>) -> Self {
        let config = config(path);
        let identity = Arc::new(identity(&config));
        let pool = pool(&config);
        let publisher = Publisher::new(identity, Arc::clone(&pool), config.profile.clone());
        Self {
            config,
            pool,
            publisher,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.config.relays.query_timeout_secs)
    }
}

//! Configuration schema for `~/.agent-reach/config.toml`.
//!
//! Every section has defaults so a missing or partial file still yields a
//! usable config. Loading and validation live in `reach-kernel::config`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Highest `config_version` this build understands.
pub const CONFIG_VERSION: u32 = 1;

/// Relays used when the config names none.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

/// Environment variable consulted for the secret key when the file has none.
pub const DEFAULT_SECRET_KEY_ENV: &str = "AGENT_REACH_SECRET_KEY";

/// Session key that inbound DMs are injected under.
pub const DEFAULT_SESSION_KEY: &str = "agent:main:main";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachConfig {
    pub config_version: u32,
    pub log_level: String,
    /// Directory for persisted state. Defaults to `<home>/.agent-reach/state`.
    pub state_dir: Option<PathBuf>,
    pub identity: IdentityConfig,
    pub profile: ProfileConfig,
    pub relays: RelayConfig,
    pub discovery: DiscoveryConfig,
    pub dm: DmConfig,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            log_level: "info".to_string(),
            state_dir: None,
            identity: IdentityConfig::default(),
            profile: ProfileConfig::default(),
            relays: RelayConfig::default(),
            discovery: DiscoveryConfig::default(),
            dm: DmConfig::default(),
        }
    }
}

impl ReachConfig {
    /// Configured relays, or the defaults when the list is empty.
    pub fn resolved_relays(&self) -> Vec<String> {
        let urls: Vec<String> = self
            .relays
            .urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect()
        } else {
            urls
        }
    }

    /// State directory with a leading `~` expanded.
    pub fn resolved_state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => expand_home(dir),
            None => reach_home().join("state"),
        }
    }
}

/// `<home>/.agent-reach`, falling back to a temp dir without a home.
pub fn reach_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agent-reach")
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Where the agent's secret key comes from.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// `nsec1...` or 64 hex characters.
    pub secret_key: String,
    pub secret_key_env: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            secret_key_env: DEFAULT_SECRET_KEY_ENV.to_string(),
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = if self.secret_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("IdentityConfig")
            .field("secret_key", &secret)
            .field("secret_key_env", &self.secret_key_env)
            .finish()
    }
}

/// Public profile published on the service card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub name: String,
    pub about: String,
    pub color: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    /// Advertise a `dm` protocol listing the configured relays.
    pub advertise_dm: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            name: "Agent".to_string(),
            about: String::new(),
            color: None,
            avatar: None,
            banner: None,
            advertise_dm: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub urls: Vec<String>,
    pub publish_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            urls: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            publish_timeout_secs: 10,
            query_timeout_secs: 10,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub card_query_limit: usize,
    pub heartbeat_lookback_secs: u64,
    pub heartbeat_query_limit: usize,
    /// Fetch kind-0 profiles to fill in missing avatars.
    pub fetch_profiles: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            card_query_limit: 100,
            heartbeat_lookback_secs: 3600,
            heartbeat_query_limit: 500,
            fetch_profiles: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmConfig {
    pub enabled: bool,
    /// Peers allowed to DM this agent (npub or hex).
    pub allow_list: Vec<String>,
    pub session_key: String,
    /// Overlap subtracted from the stored cursor when resubscribing.
    pub lookback_secs: u64,
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_list: Vec::new(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
            lookback_secs: 60,
        }
    }
}

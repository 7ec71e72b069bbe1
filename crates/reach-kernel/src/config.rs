//! Configuration loading from `~/.agent-reach/config.toml` with defaults.

use reach_types::config::{reach_home, ReachConfig, CONFIG_VERSION};
use reach_types::identity::normalize_peer_id;
use reach_types::{Identity, ReachError, ReachResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "AGENT_REACH_CONFIG";

/// Load configuration from a TOML file, with defaults.
///
/// A missing or unparseable file yields defaults. A file written for a newer
/// schema is rejected rather than half-understood. Allow-list entries are
/// normalized to lowercase hex; invalid ones are dropped with a warning.
pub fn load_config(path: Option<&Path>) -> ReachResult<ReachConfig> {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    let mut config = if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<toml::Value>(&contents) {
                Ok(value) => {
                    check_version(&value)?;
                    match value.try_into::<ReachConfig>() {
                        Ok(config) => {
                            info!(path = %config_path.display(), "Loaded configuration");
                            config
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                path = %config_path.display(),
                                "Failed to deserialize config, using defaults"
                            );
                            ReachConfig::default()
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                    ReachConfig::default()
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
                ReachConfig::default()
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        ReachConfig::default()
    };

    config.dm.allow_list = normalize_allow_list(&config.dm.allow_list);
    Ok(config)
}

fn check_version(value: &toml::Value) -> ReachResult<()> {
    let version = value
        .get("config_version")
        .and_then(|v| v.as_integer())
        .unwrap_or(i64::from(CONFIG_VERSION));
    if version > i64::from(CONFIG_VERSION) {
        return Err(ReachError::Config(format!(
            "config_version {version} is newer than supported version {CONFIG_VERSION}"
        )));
    }
    Ok(())
}

/// Default config path: `$AGENT_REACH_CONFIG` or `~/.agent-reach/config.toml`.
pub fn default_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => reach_home().join("config.toml"),
    }
}

/// Normalize allow-list entries to lowercase hex, dropping invalid ones.
pub fn normalize_allow_list(entries: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        match normalize_peer_id(entry) {
            Ok(hex) => {
                if !out.contains(&hex) {
                    out.push(hex);
                }
            }
            Err(e) => warn!(entry = %entry, error = %e, "Skipping invalid allow-list entry"),
        }
    }
    out
}

/// Resolve the signing identity from the config or its environment variable.
///
/// Missing or malformed keys are fatal: the service must not start without one.
pub fn resolve_identity(config: &ReachConfig) -> ReachResult<Identity> {
    let inline = config.identity.secret_key.trim();
    if !inline.is_empty() {
        return Identity::from_secret(inline);
    }
    let env_name = config.identity.secret_key_env.trim();
    if !env_name.is_empty() {
        if let Ok(value) = std::env::var(env_name) {
            if !value.trim().is_empty() {
                return Identity::from_secret(&value);
            }
        }
    }
    Err(ReachError::MissingIdentity(env_name.to_string()))
}

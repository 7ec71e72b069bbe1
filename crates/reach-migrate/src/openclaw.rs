//! OpenClaw source: `channels.nostr` in `openclaw.json`.

use crate::report::{ItemKind, MigrationReport};
use crate::{MigrateError, MigrateOptions};
use reach_types::identity::{normalize_peer_id, parse_secret_key};
use reach_types::ReachConfig;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.toml";
const BACKUP_FILE: &str = "config.toml.bak";
const STATE_FILES: [&str; 2] = ["service-card.json", "dm-listener-state.json"];

pub fn migrate(options: &MigrateOptions) -> Result<MigrationReport, MigrateError> {
    if !options.source_config.is_file() {
        return Err(MigrateError::SourceNotFound(options.source_config.clone()));
    }
    let raw = std::fs::read_to_string(&options.source_config)?;
    let root: Value =
        json5::from_str(&raw).map_err(|e| MigrateError::Json5Parse(e.to_string()))?;
    let nostr = root
        .pointer("/channels/nostr")
        .ok_or_else(|| MigrateError::ConfigParse("no channels.nostr section".to_string()))?;

    let mut report = MigrationReport {
        source: "OpenClaw".to_string(),
        dry_run: options.dry_run,
        ..Default::default()
    };
    let config = convert(nostr, &mut report);

    let target = options.target_dir.join(CONFIG_FILE);
    if target.exists() {
        report.warnings.push(format!(
            "{} already exists and will be backed up to {BACKUP_FILE}",
            target.display()
        ));
    }

    let state_target = options
        .target_state_dir
        .clone()
        .unwrap_or_else(|| options.target_dir.join("state"));
    if let Some(state_dir) = &options.source_state_dir {
        plan_state_copy(state_dir, &state_target, &mut report);
    }

    if options.dry_run {
        return Ok(report);
    }

    std::fs::create_dir_all(&options.target_dir)?;
    if target.exists() {
        std::fs::copy(&target, options.target_dir.join(BACKUP_FILE))?;
    }
    let toml_text = toml::to_string_pretty(&config)?;
    std::fs::write(&target, toml_text)?;
    report.import(ItemKind::Config, CONFIG_FILE, target.display().to_string());
    info!(path = %target.display(), "Wrote agent-reach config");

    if let Some(state_dir) = &options.source_state_dir {
        std::fs::create_dir_all(&state_target)?;
        for file in STATE_FILES {
            let from = state_dir.join(file);
            if from.is_file() {
                std::fs::copy(&from, state_target.join(file))?;
            }
        }
    }

    Ok(report)
}

/// Translate the legacy channel section into a config, recording each item.
fn convert(nostr: &Value, report: &mut MigrationReport) -> ReachConfig {
    let mut config = ReachConfig::default();

    match nostr.get("privateKey").and_then(Value::as_str) {
        Some(key) => match parse_secret_key(key) {
            Ok(_) => {
                config.identity.secret_key = key.trim().to_string();
                report.import(ItemKind::Secret, "privateKey", "identity.secret_key");
                report.warnings.push(format!(
                    "The secret key is stored in plain text; consider moving it to ${}",
                    config.identity.secret_key_env
                ));
            }
            Err(e) => report.skip(ItemKind::Secret, "privateKey", e.to_string()),
        },
        None => report.warnings.push(format!(
            "No privateKey found; set ${} before starting",
            config.identity.secret_key_env
        )),
    }

    if let Some(relays) = nostr.get("relays").and_then(Value::as_array) {
        config.relays.urls.clear();
        for relay in relays {
            let Some(url) = relay.as_str().map(str::trim) else {
                continue;
            };
            if url.starts_with("wss://") || url.starts_with("ws://") {
                config.relays.urls.push(url.to_string());
                report.import(ItemKind::Relay, url, "relays.urls");
            } else {
                report.skip(ItemKind::Relay, url, "not a ws:// or wss:// URL");
            }
        }
    }

    if let Some(profile) = nostr.get("profile") {
        let field = |name: &str| {
            profile
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(name) = field("name") {
            config.profile.name = name;
            report.import(ItemKind::Profile, "name", "profile.name");
        }
        if let Some(about) = field("about") {
            config.profile.about = about;
            report.import(ItemKind::Profile, "about", "profile.about");
        }
        if let Some(picture) = field("picture") {
            config.profile.avatar = Some(picture);
            report.import(ItemKind::Profile, "picture", "profile.avatar");
        }
    }

    if nostr.get("enabled").and_then(Value::as_bool) == Some(false) {
        config.profile.advertise_dm = false;
        report
            .warnings
            .push("The Nostr channel was disabled; the DM protocol will not be advertised".to_string());
    }

    if let Some(entries) = nostr.get("allowFrom").and_then(Value::as_array) {
        for entry in entries {
            let raw = match entry {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            match normalize_peer_id(&raw) {
                Ok(hex) if !config.dm.allow_list.contains(&hex) => {
                    config.dm.allow_list.push(hex);
                    report.import(ItemKind::AllowList, raw, "dm.allow_list");
                }
                Ok(_) => report.skip(ItemKind::AllowList, raw, "duplicate entry"),
                Err(e) => {
                    warn!(entry = %raw, "Skipping allow-list entry");
                    report.skip(ItemKind::AllowList, raw, e.to_string());
                }
            }
        }
    }

    config
}

fn plan_state_copy(from: &Path, to: &Path, report: &mut MigrationReport) {
    for file in STATE_FILES {
        if from.join(file).is_file() {
            report.import(ItemKind::State, file, to.join(file).display().to_string());
        } else {
            report.skip(ItemKind::State, file, "not present");
        }
    }
}

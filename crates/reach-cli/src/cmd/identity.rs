//! `whoami`.

use crate::context;
use crate::ui;
use serde_json::json;
use std::path::PathBuf;

pub fn cmd_whoami(config: Option<PathBuf>, json: bool) {
    let config = context::config(config);
    let identity = context::identity(&config);
    let relays = config.resolved_relays();
    let state_dir = config.resolved_state_dir();

    if json {
        ui::print_json(&json!({
            "npub": identity.npub(),
            "pubkey": identity.public_key_hex(),
            "cardId": identity.card_id(),
            "relays": relays,
            "stateDir": state_dir.display().to_string(),
        }));
        return;
    }

    ui::section("agent-reach identity");
    ui::blank();
    ui::kv("Npub", identity.npub());
    ui::kv("Pubkey", identity.public_key_hex());
    ui::kv("Card id", &identity.card_id());
    ui::kv("Name", &config.profile.name);
    ui::kv("State dir", &state_dir.display().to_string());
    ui::kv("Relays", &relays.join(", "));
    if config.dm.allow_list.is_empty() {
        ui::kv_warn("DM inbox", "disabled (empty allow-list)");
    } else {
        ui::kv_ok(
            "DM inbox",
            &format!("{} allowed sender(s)", config.dm.allow_list.len()),
        );
    }
}

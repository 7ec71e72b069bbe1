//! `send`.

use crate::context::{self, die, Session};
use crate::ui;
use reach_types::identity::{encode_npub, parse_peer_id, truncate_npub};
use serde_json::json;
use std::path::PathBuf;

pub fn cmd_send(config: Option<PathBuf>, peer: &str, message: &str, json: bool) {
    if message.trim().is_empty() {
        die("Message is required", "agent-reach send <npub> \"your message\"");
    }
    let recipient = match parse_peer_id(peer) {
        Ok(pk) => pk,
        Err(e) => die(e, "Pass an npub1... or 64-character hex public key"),
    };

    let session = Session::open(config);
    let rt = context::runtime();
    let result = rt.block_on(async {
        let sent = session.publisher.send_direct_message(&recipient, message).await;
        session.pool.disconnect().await;
        sent
    });

    match result {
        Ok(event_id) => {
            if json {
                ui::print_json(&json!({ "eventId": event_id, "to": recipient.to_hex() }));
            } else {
                let to = encode_npub(&recipient).unwrap_or_else(|| recipient.to_hex());
                ui::success(&format!("Message sent to {}", truncate_npub(&to)));
                ui::kv("Event", &event_id);
            }
        }
        Err(e) => die(format!("Failed to send: {e}"), "Check that your relays are reachable"),
    }
}

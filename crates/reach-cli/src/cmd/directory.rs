//! `discover`, `lookup`, `status`: one catch-up pass against the relays.

use crate::context::{self, die, Session};
use crate::table::{Align, Table};
use crate::ui;
use reach_kernel::query::sort_for_display;
use reach_kernel::tools::agent_summary;
use reach_kernel::{unix_now, AgentDirectory, AgentQuery, ReconciliationEngine};
use reach_types::identity::{npub_from_hex, truncate_npub};
use reach_types::Agent;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Build a directory from stored cards and recent heartbeats.
fn snapshot_directory(session: &Session) -> AgentQuery {
    let directory = Arc::new(AgentDirectory::new());
    let engine = ReconciliationEngine::new(
        Arc::clone(&directory),
        Arc::clone(&session.pool),
        session.config.discovery.clone(),
        session.query_timeout(),
    );
    let rt = context::runtime();
    rt.block_on(async {
        engine.catch_up().await;
        session.pool.disconnect().await;
    });
    AgentQuery::new(directory)
}

fn last_seen(agent: &Agent) -> String {
    match agent.last_seen {
        Some(ts) => {
            let ago = unix_now().saturating_sub(ts);
            match ago {
                0..=59 => format!("{ago}s ago"),
                60..=3599 => format!("{}m ago", ago / 60),
                _ => format!("{}h ago", ago / 3600),
            }
        }
        None => "never".to_string(),
    }
}

pub fn cmd_discover(config: Option<PathBuf>, capability: Option<&str>, limit: usize, json: bool) {
    let session = Session::open(config);
    let query = snapshot_directory(&session);
    let Some(mut agents) = query.discover_agents(capability, Some(limit)) else {
        die("Directory did not finish syncing", "Try again in a moment");
    };
    sort_for_display(&mut agents);

    if json {
        ui::print_json(&json!({
            "agents": agents.iter().map(agent_summary).collect::<Vec<_>>(),
            "count": agents.len(),
            "query": capability.unwrap_or("all"),
        }));
        return;
    }

    if agents.is_empty() {
        ui::hint(&match capability {
            Some(c) => format!("No agents advertise '{c}'"),
            None => "No agents found".to_string(),
        });
        return;
    }

    let mut table = Table::new(&["Name", "Npub", "Capabilities", "Status", "Seen"]).align(4, Align::Right);
    for agent in &agents {
        let caps: Vec<&str> = agent.card.body.capabilities.iter().map(|c| c.id.as_str()).collect();
        table.add_row(vec![
            agent.card.name().to_string(),
            truncate_npub(&npub_from_hex(agent.pubkey())),
            caps.join(", "),
            if agent.is_online { "online" } else { "offline" }.to_string(),
            last_seen(agent),
        ]);
    }
    table.print();
    ui::hint(&format!("{} agent(s)", agents.len()));
}

fn find_agent(config: Option<PathBuf>, peer: &str) -> Agent {
    let session = Session::open(config);
    let query = snapshot_directory(&session);
    match query.get_agent(peer) {
        Ok(Some(agent)) => agent,
        Ok(None) => die(
            format!("No service card found for {peer}"),
            "The agent may not have published a card on your relays",
        ),
        Err(e) => die(e, "Pass an npub1... or 64-character hex public key"),
    }
}

pub fn cmd_lookup(config: Option<PathBuf>, peer: &str, json: bool) {
    let agent = find_agent(config, peer);
    if json {
        ui::print_json(&agent_summary(&agent));
        return;
    }

    let body = &agent.card.body;
    ui::section(agent.card.name());
    ui::blank();
    ui::kv("Npub", &npub_from_hex(agent.pubkey()));
    if !body.about.is_empty() {
        ui::kv("About", &body.about);
    }
    ui::kv("Presence", &ui::presence(agent.is_online));
    ui::kv("Last seen", &last_seen(&agent));
    for cap in &body.capabilities {
        if cap.description.is_empty() {
            ui::kv("Capability", &cap.id);
        } else {
            ui::kv("Capability", &format!("{} ({})", cap.id, cap.description));
        }
    }
    for proto in &body.protocols {
        ui::kv("Protocol", &format!("{} {}", proto.kind(), proto.endpoint()));
    }
    if let Some(avatar) = &body.avatar {
        ui::kv("Avatar", avatar);
    }
}

pub fn cmd_status(config: Option<PathBuf>, peer: &str, json: bool) {
    let agent = find_agent(config, peer);
    let status = agent.heartbeat.as_ref().map(|hb| hb.status.to_string());
    if json {
        ui::print_json(&json!({
            "pubkey": agent.pubkey(),
            "online": agent.is_online,
            "status": status,
            "lastSeen": agent.last_seen,
        }));
        return;
    }
    ui::kv("Agent", agent.card.name());
    ui::kv("Presence", &ui::presence(agent.is_online));
    ui::kv("Status", status.as_deref().unwrap_or("no heartbeat"));
    ui::kv("Last seen", &last_seen(&agent));
}

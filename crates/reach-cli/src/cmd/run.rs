//! `run`: the long-lived service with a console host.

use crate::context::{self, die};
use crate::ui;
use async_trait::async_trait;
use colored::Colorize;
use reach_kernel::{HostBridge, ReachService, ToolDefinition};
use reach_types::identity::truncate_npub;
use reach_types::ReachResult;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Prints injected system events to stdout.
struct ConsoleHost;

#[async_trait]
impl HostBridge for ConsoleHost {
    fn register_tools(&self, tools: Vec<ToolDefinition>) {
        let names: Vec<String> = tools.into_iter().map(|t| t.name).collect();
        info!(tools = %names.join(", "), "Tools available");
    }

    async fn inject_system_event(&self, text: &str, session_key: &str) -> ReachResult<()> {
        println!();
        println!("  {} {}", "<<".bright_magenta().bold(), session_key.dimmed());
        for line in text.lines() {
            println!("     {line}");
        }
        Ok(())
    }

    async fn request_wake(&self) {}
}

pub fn cmd_run(config: Option<PathBuf>) {
    let config = context::config(config);
    let identity = context::identity(&config);
    let npub = identity.npub().to_string();

    let host: Arc<dyn HostBridge> = Arc::new(ConsoleHost);
    let service = match ReachService::connect(config, Some(host)) {
        Ok(s) => s.with_identity(identity),
        Err(e) => die(e, "Check relays.urls in your config (ws:// or wss://)"),
    };

    let rt = context::runtime();
    rt.block_on(async {
        if let Err(e) = service.start().await {
            die(e, "Run `agent-reach whoami` to check your setup");
        }

        ui::section("agent-reach running");
        ui::blank();
        ui::kv("Npub", &truncate_npub(&npub));
        if let Some(state) = service.card_state().await {
            ui::kv("Capabilities", &state.capability_summary());
            ui::kv("Presence", &ui::presence(state.is_online()));
        }
        for relay in service.relay_status() {
            if relay.connected {
                ui::kv_ok("Relay", &relay.url);
            } else {
                ui::kv_warn("Relay", &format!("{} (connecting)", relay.url));
            }
        }
        ui::hint("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            ui::error(&format!("Could not listen for Ctrl+C: {e}"));
        }
        println!();
        info!("Shutting down");
        if let Err(e) = service.stop().await {
            ui::error(&format!("Shutdown error: {e}"));
        }
    });
}

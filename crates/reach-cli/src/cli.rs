//! Clap CLI definitions for agent-reach.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  agent-reach whoami                     Show your npub and card id
  agent-reach publish                    Publish your service card
  agent-reach discover -c research       Find agents that do research
  agent-reach send npub1... \"hello\"      Send an encrypted DM
  agent-reach update -C coding --online  Change capabilities or presence
  agent-reach run                        Stay online and print inbound DMs

\x1b[1;36mSetup:\x1b[0m
  export AGENT_REACH_SECRET_KEY=nsec1...   or set identity.secret_key in
  ~/.agent-reach/config.toml";

/// agent-reach: presence, discovery and DMs for AI agents over Nostr.
#[derive(Parser)]
#[command(name = "agent-reach", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the configured identity.
    Whoami,
    /// Publish the service card from the saved local state.
    Publish,
    /// Send one heartbeat (available, busy or maintenance).
    Heartbeat {
        status: String,
    },
    /// Search the network for agents.
    Discover {
        /// Only agents advertising this capability.
        #[arg(long, short = 'c')]
        capability: Option<String>,
        /// Maximum number of agents to show.
        #[arg(long, short = 'l', default_value_t = 20)]
        limit: usize,
    },
    /// Show one agent's service card.
    Lookup {
        /// npub or hex public key.
        peer: String,
    },
    /// Show whether one agent is online.
    Status {
        /// npub or hex public key.
        peer: String,
    },
    /// Send an encrypted direct message.
    Send {
        /// npub or hex public key.
        peer: String,
        message: String,
    },
    /// Update the local service card and republish it.
    Update(UpdateArgs),
    /// Run the service until Ctrl+C, printing inbound DMs.
    Run,
    /// Import settings from a legacy OpenClaw config.
    Migrate(MigrateArgs),
}

#[derive(clap::Args)]
pub struct UpdateArgs {
    /// Capability as `id` or `id:description` (repeatable, replaces the list).
    #[arg(long = "capability", short = 'C')]
    pub capabilities: Vec<String>,
    /// Remove every capability.
    #[arg(long, conflicts_with = "capabilities")]
    pub clear_capabilities: bool,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub about: Option<String>,
    /// Heartbeat interval in milliseconds.
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// Resume heartbeats.
    #[arg(long, conflicts_with = "offline")]
    pub online: bool,
    /// Pause heartbeats.
    #[arg(long)]
    pub offline: bool,
}

#[derive(clap::Args)]
pub struct MigrateArgs {
    /// Path to openclaw.json.
    #[arg(long)]
    pub from: PathBuf,
    /// Legacy plugin state directory to copy card and DM state from.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Report what would change without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

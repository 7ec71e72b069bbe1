//! agent-reach CLI.
//!
//! Every command except `run` is single-shot: it opens short-lived relay
//! connections, does one thing and exits. `run` keeps the full service up
//! until interrupted.

mod cli;
mod cmd;
mod context;
pub mod table;
mod ui;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the configured level. Commands reload the config
    // themselves so load warnings are reported once tracing is up.
    let level = reach_kernel::config::load_config(cli.config.as_deref())
        .map(|c| c.log_level)
        .unwrap_or_else(|_| "info".to_string());
    init_tracing_stderr(&level);

    let json = cli.json;
    let config = cli.config;
    match cli.command {
        Commands::Whoami => cmd::identity::cmd_whoami(config, json),
        Commands::Publish => cmd::presence::cmd_publish(config, json),
        Commands::Heartbeat { status } => cmd::presence::cmd_heartbeat(config, &status, json),
        Commands::Update(args) => cmd::presence::cmd_update(config, args, json),
        Commands::Discover { capability, limit } => {
            cmd::directory::cmd_discover(config, capability.as_deref(), limit, json)
        }
        Commands::Lookup { peer } => cmd::directory::cmd_lookup(config, &peer, json),
        Commands::Status { peer } => cmd::directory::cmd_status(config, &peer, json),
        Commands::Send { peer, message } => cmd::message::cmd_send(config, &peer, &message, json),
        Commands::Run => cmd::run::cmd_run(config),
        Commands::Migrate(args) => cmd::migrate::cmd_migrate(args, json),
    }
}

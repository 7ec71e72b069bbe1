//! Core kernel for agent-reach.
//!
//! Wires identity, relays and local state into a running presence service:
//! the publisher keeps our card and heartbeat fresh, the reconciliation
//! engine merges everyone else's into one directory, and the DM gateway
//! hands allow-listed messages to the host.

pub mod config;
pub mod dm_gateway;
pub mod error;
pub mod host;
pub mod publisher;
pub mod query;
pub mod reconcile;
pub mod service;
pub mod ticker;
pub mod tools;

pub use dm_gateway::{DmGateway, DmOutcome};
pub use error::{KernelError, KernelResult};
pub use host::HostBridge;
pub use publisher::Publisher;
pub use query::AgentQuery;
pub use reconcile::{AgentDirectory, ReconciliationEngine};
pub use service::{ReachService, ServiceState};
pub use tools::{ToolDefinition, ToolResult};

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

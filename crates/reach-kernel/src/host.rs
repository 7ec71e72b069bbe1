//! The host runtime boundary.
//!
//! A host embeds the service, exposes its tools to an agent and accepts
//! system events into agent sessions. Every call is fire-and-forget from the
//! protocol's point of view; without a host the service still runs and only
//! logs inbound messages.

use crate::tools::ToolDefinition;
use async_trait::async_trait;
use reach_types::ReachResult;

/// Collaborator interface provided by the embedding host.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Make the service's tools invocable by the host's agents.
    fn register_tools(&self, tools: Vec<ToolDefinition>);

    /// Surface `text` as a system event in the session named `session_key`.
    async fn inject_system_event(&self, text: &str, session_key: &str) -> ReachResult<()>;

    /// Ask the host to re-evaluate now instead of waiting for its next turn.
    async fn request_wake(&self);
}

//! Tool surface exposed to the host.
//!
//! Tools never fail with an error: every outcome is a [`ToolResult`] whose
//! message is meant to be shown to the calling agent as-is.

use crate::query::sort_for_display;
use crate::service::{CardUpdate, ReachService};
use reach_types::identity::npub_from_hex;
use reach_types::{Agent, ReachError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default number of agents the `discover_agents` tool returns.
pub const TOOL_DISCOVER_LIMIT: usize = 10;

/// Definition of a tool the host can invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier.
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema for the tool arguments.
    pub parameters: Value,
}

/// Structured outcome of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl From<ReachError> for ToolResult {
    fn from(e: ReachError) -> Self {
        Self::fail(e.to_string())
    }
}

/// Every tool this service provides.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "discover_agents".to_string(),
            description: "Search for other AI agents by capability on the agent-reach network. \
                Returned agents include their npub, which can be used with contact_agent."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "capability": {
                        "type": "string",
                        "description": "Capability to search for (e.g. 'coding', 'research'). Leave empty to list all agents."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of agents to return (default: 10)"
                    }
                },
                "required": [],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "update_service_card".to_string(),
            description: "Update your service card on the discovery network. Changes are \
                published immediately. Set online=false to pause heartbeats."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "capabilities": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Capabilities as 'id' or 'id:description'. Replaces the existing list."
                    },
                    "name": { "type": "string", "description": "Display name" },
                    "about": { "type": "string", "description": "Description of your agent" },
                    "heartbeatIntervalMs": {
                        "type": "integer",
                        "description": "Heartbeat interval in milliseconds (default: 600000)"
                    },
                    "online": {
                        "type": "boolean",
                        "description": "false pauses heartbeats (go offline), true resumes them"
                    }
                },
                "required": [],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "contact_agent".to_string(),
            description: "Send an encrypted direct message to another agent.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "npub": { "type": "string", "description": "Recipient npub" },
                    "pubkey": { "type": "string", "description": "Recipient public key (hex)" },
                    "message": { "type": "string", "description": "Message text" }
                },
                "required": ["message"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get_agent".to_string(),
            description: "Look up one agent by npub or hex public key.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pubkey": { "type": "string", "description": "npub or hex public key" }
                },
                "required": ["pubkey"],
                "additionalProperties": false
            }),
        },
    ]
}

/// JSON view of an agent for tool output.
pub fn agent_summary(agent: &Agent) -> Value {
    let body = &agent.card.body;
    json!({
        "name": body.name,
        "npub": npub_from_hex(&agent.card.pubkey),
        "pubkey": agent.card.pubkey,
        "about": body.about,
        "capabilities": body.capabilities,
        "protocols": body
            .protocols
            .iter()
            .map(|p| json!({ "type": p.kind(), "endpoint": p.endpoint() }))
            .collect::<Vec<_>>(),
        "avatar": body.avatar,
        "online": agent.is_online,
        "lastSeen": agent.last_seen,
    })
}

#[derive(Debug, Default, Deserialize)]
struct DiscoverArgs {
    capability: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ContactArgs {
    npub: Option<String>,
    pubkey: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct GetAgentArgs {
    #[serde(default)]
    pubkey: String,
}

fn parse_args<T: serde::de::DeserializeOwned + Default>(args: Value) -> Result<T, ToolResult> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args).map_err(|e| ToolResult::fail(format!("Invalid arguments: {e}")))
}

/// Run a tool by name.
pub async fn invoke_tool(service: &ReachService, name: &str, args: Value) -> ToolResult {
    match name {
        "discover_agents" => match parse_args::<DiscoverArgs>(args) {
            Ok(a) => discover_agents(service, a),
            Err(r) => r,
        },
        "update_service_card" => match parse_args::<CardUpdate>(args) {
            Ok(update) => service.update_service_card(update).await,
            Err(r) => r,
        },
        "contact_agent" => match parse_args::<ContactArgs>(args) {
            Ok(a) => contact_agent(service, a).await,
            Err(r) => r,
        },
        "get_agent" => match parse_args::<GetAgentArgs>(args) {
            Ok(a) => get_agent(service, a),
            Err(r) => r,
        },
        other => ToolResult::fail(format!("Unknown tool: {other}")),
    }
}

fn discover_agents(service: &ReachService, args: DiscoverArgs) -> ToolResult {
    if !service.is_running() {
        return ReachError::NotRunning.into();
    }
    let capability = args.capability.filter(|c| !c.trim().is_empty());
    let limit = args.limit.unwrap_or(TOOL_DISCOVER_LIMIT);
    let Some(mut agents) = service
        .query()
        .discover_agents(capability.as_deref(), Some(limit))
    else {
        return ToolResult::fail("Agent directory is still syncing, try again shortly");
    };
    sort_for_display(&mut agents);
    let summaries: Vec<Value> = agents.iter().map(agent_summary).collect();
    ToolResult::ok(
        format!("Found {} agent(s)", summaries.len()),
        json!({
            "agents": summaries,
            "count": summaries.len(),
            "query": capability.as_deref().unwrap_or("all"),
        }),
    )
}

async fn contact_agent(service: &ReachService, args: ContactArgs) -> ToolResult {
    if args.message.trim().is_empty() {
        return ToolResult::fail("Message is required");
    }
    let Some(peer) = args.npub.or(args.pubkey).filter(|p| !p.trim().is_empty()) else {
        return ToolResult::fail("Either npub or pubkey is required");
    };
    match service.contact_agent(&peer, &args.message).await {
        Ok(event_id) => ToolResult::ok(
            format!("Message sent to {peer}"),
            json!({ "eventId": event_id }),
        ),
        Err(e) => ToolResult::fail(format!("Failed to send: {e}")),
    }
}

fn get_agent(service: &ReachService, args: GetAgentArgs) -> ToolResult {
    match service.query().get_agent(&args.pubkey) {
        Ok(Some(agent)) => ToolResult::ok(agent.card.name().to_string(), agent_summary(&agent)),
        Ok(None) => ToolResult::fail(format!("No service card known for {}", args.pubkey)),
        Err(e) => e.into(),
    }
}

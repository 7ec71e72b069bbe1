//! Service cards: an agent's self-published directory listing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default heartbeat interval (10 minutes).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 600_000;

/// Smallest heartbeat interval accepted from local state.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// A single advertised capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

impl Capability {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }

    /// Parse `"id"` or `"id:description"`.
    pub fn parse(input: &str) -> Option<Self> {
        let (id, description) = match input.split_once(':') {
            Some((id, desc)) => (id.trim(), desc.trim()),
            None => (input.trim(), ""),
        };
        if id.is_empty() {
            return None;
        }
        Some(Self::new(id, description))
    }
}

/// Communication protocol for reaching an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Protocol {
    /// Encrypted direct messages on the listed relays (comma separated).
    Dm { relays: String },
    /// Data vending machine jobs on the listed relays.
    Dvm { relays: String, kinds: Vec<u16> },
    /// A2A agent card URL.
    A2a { url: String },
    /// MCP server endpoint.
    Mcp { url: String },
    /// Plain HTTP API endpoint.
    Http { url: String },
    /// Anything else, kept verbatim.
    Custom { id: String, endpoint: String },
}

impl Protocol {
    /// Build a protocol from its wire `(type, endpoint)` pair.
    pub fn from_parts(kind: &str, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        match kind {
            "dm" => Self::Dm { relays: endpoint },
            "dvm" => Self::Dvm {
                relays: endpoint,
                kinds: Vec::new(),
            },
            "a2a" => Self::A2a { url: endpoint },
            "mcp" => Self::Mcp { url: endpoint },
            "http" => Self::Http { url: endpoint },
            other => Self::Custom {
                id: other.to_string(),
                endpoint,
            },
        }
    }

    /// Protocol type string as it appears on the wire.
    pub fn kind(&self) -> &str {
        match self {
            Self::Dm { .. } => "dm",
            Self::Dvm { .. } => "dvm",
            Self::A2a { .. } => "a2a",
            Self::Mcp { .. } => "mcp",
            Self::Http { .. } => "http",
            Self::Custom { id, .. } => id,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Self::Dm { relays } | Self::Dvm { relays, .. } => relays,
            Self::A2a { url } | Self::Mcp { url } | Self::Http { url } => url,
            Self::Custom { endpoint, .. } => endpoint,
        }
    }
}

/// The signed, author-controlled part of a service card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardBody {
    /// Card identifier (`d` tag).
    pub card_id: String,
    pub name: String,
    pub about: String,
    pub capabilities: Vec<Capability>,
    pub protocols: Vec<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// A service card as observed on the relay network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceCard {
    /// Author public key, lowercase hex.
    pub pubkey: String,
    /// Relay-assigned event id, hex.
    pub event_id: String,
    /// Event `created_at`, unix seconds.
    pub created_at: u64,
    pub body: CardBody,
}

impl ServiceCard {
    /// Whether the card advertises the given capability id (case-insensitive).
    pub fn has_capability(&self, capability: &str) -> bool {
        self.body
            .capabilities
            .iter()
            .any(|c| c.id.eq_ignore_ascii_case(capability))
    }

    pub fn name(&self) -> &str {
        &self.body.name
    }
}

/// The operator's own mutable card state, persisted across restarts.
///
/// Field names follow the camelCase layout of the original state file so
/// existing `service-card.json` files load unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalCardState {
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    /// `Some(false)` pauses heartbeats; absent means online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

fn default_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

impl Default for LocalCardState {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            name: None,
            about: None,
            online: None,
        }
    }
}

impl LocalCardState {
    pub fn is_online(&self) -> bool {
        self.online != Some(false)
    }

    /// Effective heartbeat interval. Zero falls back to the default.
    pub fn heartbeat_interval(&self) -> Duration {
        let ms = match self.heartbeat_interval_ms {
            0 => DEFAULT_HEARTBEAT_INTERVAL_MS,
            ms => ms.max(MIN_HEARTBEAT_INTERVAL_MS),
        };
        Duration::from_millis(ms)
    }

    /// Comma-separated capability ids, or `none`.
    pub fn capability_summary(&self) -> String {
        if self.capabilities.is_empty() {
            return "none".to_string();
        }
        self.capabilities
            .iter()
            .map(|c| c.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parse() {
        assert_eq!(
            Capability::parse("coding:writes code"),
            Some(Capability::new("coding", "writes code"))
        );
        assert_eq!(
            Capability::parse("research"),
            Some(Capability::new("research", ""))
        );
        assert_eq!(Capability::parse(" :nothing"), None);
    }

    #[test]
    fn test_protocol_from_parts() {
        assert_eq!(Protocol::from_parts("mcp", "https://x").kind(), "mcp");
        let custom = Protocol::from_parts("grpc", "host:1");
        assert_eq!(custom.kind(), "grpc");
        assert_eq!(custom.endpoint(), "host:1");
    }

    #[test]
    fn test_local_state_defaults_from_empty_json() {
        let state: LocalCardState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, LocalCardState::default());
        assert!(state.is_online());
        assert_eq!(state.heartbeat_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_local_state_legacy_layout() {
        let json = r#"{
            "capabilities": [{"id": "coding", "description": ""}],
            "heartbeatIntervalMs": 300000,
            "name": "Scout",
            "online": false
        }"#;
        let state: LocalCardState = serde_json::from_str(json).unwrap();
        assert_eq!(state.capabilities.len(), 1);
        assert_eq!(state.heartbeat_interval(), Duration::from_secs(300));
        assert!(!state.is_online());
        assert_eq!(state.capability_summary(), "coding");

        let out = serde_json::to_value(&state).unwrap();
        assert_eq!(out["heartbeatIntervalMs"], 300000);
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let state = LocalCardState {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            state.heartbeat_interval(),
            Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS)
        );
    }

    #[test]
    fn test_has_capability_case_insensitive() {
        let card = ServiceCard {
            pubkey: "ab".repeat(32),
            event_id: "00".repeat(32),
            created_at: 1,
            body: CardBody {
                capabilities: vec![Capability::new("Research", "")],
                ..Default::default()
            },
        };
        assert!(card.has_capability("research"));
        assert!(!card.has_capability("coding"));
    }
}

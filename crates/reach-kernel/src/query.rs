//! Snapshot queries over the merged directory.

use crate::reconcile::AgentDirectory;
use crate::unix_now;
use reach_types::identity::normalize_peer_id;
use reach_types::{Agent, ReachResult};
use std::sync::Arc;

/// Default number of agents returned by [`AgentQuery::discover_agents`].
pub const DEFAULT_DISCOVER_LIMIT: usize = 20;

/// Read-only access to the directory.
#[derive(Clone)]
pub struct AgentQuery {
    directory: Arc<AgentDirectory>,
}

impl AgentQuery {
    pub fn new(directory: Arc<AgentDirectory>) -> Self {
        Self { directory }
    }

    /// Agents advertising `capability` (all agents when `None`), at most
    /// `limit` of them. Order is stable for one snapshot.
    ///
    /// `None` while the directory is still catching up.
    pub fn discover_agents(
        &self,
        capability: Option<&str>,
        limit: Option<usize>,
    ) -> Option<Vec<Agent>> {
        self.discover_at(capability, limit, unix_now())
    }

    pub fn discover_at(
        &self,
        capability: Option<&str>,
        limit: Option<usize>,
        now: u64,
    ) -> Option<Vec<Agent>> {
        let capability = capability.map(str::trim).filter(|c| !c.is_empty());
        let agents = self.directory.snapshot(now)?;
        Some(
            agents
                .into_iter()
                .filter(|a| capability.map_or(true, |c| a.card.has_capability(c)))
                .take(limit.unwrap_or(DEFAULT_DISCOVER_LIMIT))
                .collect(),
        )
    }

    /// One agent by hex or npub.
    pub fn get_agent(&self, peer: &str) -> ReachResult<Option<Agent>> {
        let pubkey = normalize_peer_id(peer)?;
        Ok(self.directory.agent(&pubkey, unix_now()))
    }

    pub fn is_syncing(&self) -> bool {
        self.directory.is_syncing()
    }
}

/// Display order: online first, then by name.
pub fn sort_for_display(agents: &mut [Agent]) {
    agents.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| a.card.name().to_lowercase().cmp(&b.card.name().to_lowercase()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_types::{CardBody, Capability, Heartbeat, ServiceCard, Status};

    const NOW: u64 = 1_700_000_000;

    fn add(dir: &AgentDirectory, n: u8, name: &str, caps: &[&str], online: bool) {
        let pubkey = format!("{n:02x}").repeat(32);
        dir.apply_card(ServiceCard {
            pubkey: pubkey.clone(),
            event_id: format!("e{n}"),
            created_at: NOW - 100,
            body: CardBody {
                card_id: format!("{}-v1", &pubkey[..8]),
                name: name.to_string(),
                capabilities: caps.iter().map(|c| Capability::new(*c, "")).collect(),
                ..Default::default()
            },
        });
        if online {
            let hb = Heartbeat {
                pubkey,
                card_id: String::new(),
                status: Status::Available,
                created_at: NOW - 10,
                event_id: format!("h{n}"),
            };
            dir.apply_heartbeat(hb, NOW);
        }
    }

    fn five_agents() -> AgentQuery {
        let dir = Arc::new(AgentDirectory::new());
        dir.finish_sync(NOW);
        add(&dir, 1, "alpha", &["coding"], true);
        add(&dir, 2, "bravo", &["research", "coding"], false);
        add(&dir, 3, "charlie", &["writing"], true);
        add(&dir, 4, "delta", &["Research"], true);
        add(&dir, 5, "echo", &[], false);
        AgentQuery::new(dir)
    }

    #[test]
    fn test_capability_filter() {
        let query = five_agents();
        let found = query.discover_at(Some("research"), None, NOW).unwrap();
        let mut names: Vec<&str> = found.iter().map(|a| a.card.name()).collect();
        names.sort();
        assert_eq!(names, vec!["bravo", "delta"]);
    }

    #[test]
    fn test_limit_and_stable_order() {
        let query = five_agents();
        let first = query.discover_at(None, Some(3), NOW).unwrap();
        let second = query.discover_at(None, Some(3), NOW).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(query.discover_at(Some("  "), None, NOW).unwrap().len(), 5);
    }

    #[test]
    fn test_syncing_directory_returns_none() {
        let query = AgentQuery::new(Arc::new(AgentDirectory::new()));
        assert!(query.discover_at(None, None, NOW).is_none());
        assert!(query.is_syncing());
    }

    #[test]
    fn test_get_agent_accepts_npub() {
        let dir = Arc::new(AgentDirectory::new());
        let identity = reach_types::Identity::generate();
        dir.apply_card(ServiceCard {
            pubkey: identity.public_key_hex().to_string(),
            event_id: "e".to_string(),
            created_at: NOW,
            body: CardBody::default(),
        });
        let query = AgentQuery::new(dir);
        assert!(query.get_agent(identity.npub()).unwrap().is_some());
        let stranger = reach_types::Identity::generate();
        assert!(query
            .get_agent(stranger.public_key_hex())
            .unwrap()
            .is_none());
        assert!(query.get_agent("not-a-key").is_err());
    }

    #[test]
    fn test_display_sort() {
        let query = five_agents();
        let mut agents = query.discover_at(None, None, NOW).unwrap();
        sort_for_display(&mut agents);
        let names: Vec<&str> = agents.iter().map(|a| a.card.name()).collect();
        assert_eq!(names, vec!["alpha", "charlie", "delta", "bravo", "echo"]);
    }
}

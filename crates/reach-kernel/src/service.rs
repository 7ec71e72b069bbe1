//! ReachService: assembles the publisher, directory, DM gateway and tool
//! surface into one start/stop lifecycle.

use crate::config::resolve_identity;
use crate::dm_gateway::DmGateway;
use crate::error::{KernelError, KernelResult};
use crate::host::HostBridge;
use crate::publisher::Publisher;
use crate::query::AgentQuery;
use crate::reconcile::{AgentDirectory, ReconciliationEngine};
use crate::tools::{tool_definitions, ToolResult};
use reach_memory::{CardStateStore, StateDir};
use reach_types::identity::{parse_peer_id, truncate_npub};
use reach_types::{Agent, Capability, Identity, LocalCardState, ReachConfig, ReachError, ReachResult, Status};
use reach_wire::{RelayPool, RelayStatus, WsRelayPool};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Lifecycle of a [`ReachService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
}

/// Fields of an `update_service_card` call. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    /// `"id"` or `"id:description"`. Replaces the whole list.
    pub capabilities: Option<Vec<String>>,
    pub name: Option<String>,
    pub about: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub online: Option<bool>,
}

impl CardUpdate {
    /// Apply onto `state`, returning the new state.
    pub fn apply(&self, state: &LocalCardState) -> LocalCardState {
        let mut next = state.clone();
        if let Some(caps) = &self.capabilities {
            next.capabilities = caps.iter().filter_map(|c| Capability::parse(c)).collect();
        }
        if let Some(name) = &self.name {
            next.name = Some(name.clone());
        }
        if let Some(about) = &self.about {
            next.about = Some(about.clone());
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            next.heartbeat_interval_ms = ms;
        }
        if let Some(online) = self.online {
            next.online = Some(online);
        }
        next
    }
}

/// Everything that only exists while the service runs.
struct Running {
    identity: Arc<Identity>,
    publisher: Publisher,
    engine: ReconciliationEngine,
    gateway: Option<Arc<DmGateway>>,
    card_store: CardStateStore,
    card_state: LocalCardState,
}

/// The agent-reach service.
pub struct ReachService {
    config: ReachConfig,
    pool: Arc<dyn RelayPool>,
    host: Option<Arc<dyn HostBridge>>,
    identity: Option<Arc<Identity>>,
    directory: Arc<AgentDirectory>,
    state: Mutex<ServiceState>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl ReachService {
    pub fn new(
        config: ReachConfig,
        pool: Arc<dyn RelayPool>,
        host: Option<Arc<dyn HostBridge>>,
    ) -> Self {
        Self {
            config,
            pool,
            host,
            identity: None,
            directory: Arc::new(AgentDirectory::new()),
            state: Mutex::new(ServiceState::Stopped),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Service backed by WebSocket relays from the config.
    pub fn connect(config: ReachConfig, host: Option<Arc<dyn HostBridge>>) -> ReachResult<Self> {
        let pool = WsRelayPool::new(
            config.resolved_relays(),
            Duration::from_secs(config.relays.publish_timeout_secs),
        )?;
        Ok(Self::new(config, Arc::new(pool), host))
    }

    /// Use `identity` instead of resolving one from the config at start.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn config(&self) -> &ReachConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    pub fn query(&self) -> AgentQuery {
        AgentQuery::new(Arc::clone(&self.directory))
    }

    pub fn relay_status(&self) -> Vec<RelayStatus> {
        self.pool.relay_status()
    }

    /// Our identity, once started.
    pub async fn identity(&self) -> Option<Arc<Identity>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.identity))
    }

    /// Current local card state, once started.
    pub async fn card_state(&self) -> Option<LocalCardState> {
        self.running.lock().await.as_ref().map(|r| r.card_state.clone())
    }

    /// Whether the heartbeat timer is armed.
    pub async fn heartbeats_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.publisher.heartbeats_running())
    }

    /// Bring the service up. Fails fast without an identity.
    pub async fn start(&self) -> KernelResult<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ServiceState::Stopped {
                return Err(KernelError::AlreadyRunning);
            }
            *state = ServiceState::Starting;
        }

        match self.boot().await {
            Ok(running) => {
                info!(
                    npub = %truncate_npub(running.identity.npub()),
                    relays = self.pool.relays().len(),
                    dm = running.gateway.is_some(),
                    "agent-reach service started"
                );
                *self.running.lock().await = Some(running);
                self.set_state(ServiceState::Running);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "agent-reach service failed to start");
                self.set_state(ServiceState::Stopped);
                Err(e)
            }
        }
    }

    async fn boot(&self) -> KernelResult<Running> {
        let identity = match &self.identity {
            Some(identity) => Arc::clone(identity),
            None => Arc::new(
                resolve_identity(&self.config)
                    .map_err(|e| KernelError::StartFailed(e.to_string()))?,
            ),
        };

        let state_dir = StateDir::new(self.config.resolved_state_dir());
        let card_store = state_dir.card_store();
        let card_state = card_store.load().await;

        let publisher = Publisher::new(
            Arc::clone(&identity),
            Arc::clone(&self.pool),
            self.config.profile.clone(),
        );
        publisher.publish_service_card(&card_state).await?;
        if card_state.is_online() {
            publisher.send_heartbeat(Status::Available).await?;
            publisher.start_heartbeats(card_state.heartbeat_interval());
        } else {
            info!("Starting offline, heartbeats paused");
        }

        let engine = ReconciliationEngine::new(
            Arc::clone(&self.directory),
            Arc::clone(&self.pool),
            self.config.discovery.clone(),
            Duration::from_secs(self.config.relays.query_timeout_secs),
        );
        engine.start().await?;

        let gateway = if !self.config.dm.enabled {
            None
        } else if self.config.dm.allow_list.is_empty() {
            info!("DM allow-list is empty, inbound DMs disabled");
            None
        } else {
            let gateway = Arc::new(DmGateway::new(
                Arc::clone(&identity),
                Arc::clone(&self.pool),
                self.host.clone(),
                &self.config.dm,
                state_dir.dm_store(),
            ));
            match gateway.start().await {
                Ok(()) => Some(gateway),
                Err(e) => {
                    warn!(error = %e, "DM gateway failed to start, continuing without it");
                    None
                }
            }
        };

        if let Some(host) = &self.host {
            host.register_tools(tool_definitions());
        }

        Ok(Running {
            identity,
            publisher,
            engine,
            gateway,
            card_store,
            card_state,
        })
    }

    /// Graceful shutdown: timer, subscriptions, final maintenance
    /// heartbeat, relay connections, then the DM cursor.
    pub async fn stop(&self) -> KernelResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.publisher.stop_heartbeats();
        running.engine.stop().await;
        if let Some(gateway) = &running.gateway {
            gateway.close().await;
        }

        let timeout = Duration::from_secs(self.config.relays.shutdown_timeout_secs);
        match tokio::time::timeout(timeout, running.publisher.send_heartbeat(Status::Maintenance)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Final heartbeat failed"),
            Err(_) => warn!(timeout_secs = timeout.as_secs(), "Final heartbeat timed out"),
        }

        self.pool.disconnect().await;
        if let Some(gateway) = &running.gateway {
            gateway.flush().await;
        }

        self.set_state(ServiceState::Stopped);
        info!("agent-reach service stopped");
        Ok(())
    }

    /// Apply a card update: persist, presence transition, then republish.
    pub async fn update_service_card(&self, update: CardUpdate) -> ToolResult {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.as_mut() else {
            return ReachError::NotRunning.into();
        };

        let before = running.card_state.clone();
        let after = update.apply(&before);

        let save_error = match running.card_store.save(&after).await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Failed to save card state");
                Some(e)
            }
        };
        running.card_state = after.clone();
        running.publisher.apply_presence(&before, &after).await;

        if let Err(e) = running.publisher.publish_service_card(&after).await {
            return ToolResult::fail(format!("Failed to publish service card: {e}"));
        }

        let mut message = format!(
            "Service card updated. Capabilities: {}",
            after.capability_summary()
        );
        if let Some(e) = &save_error {
            message.push_str(&format!(
                ". Warning: the update could not be saved and will be lost on restart ({e})"
            ));
        }
        ToolResult::ok(
            message,
            json!({
                "cardId": running.identity.card_id(),
                "capabilities": after.capabilities,
                "heartbeatIntervalMs": after.heartbeat_interval().as_millis() as u64,
                "online": after.is_online(),
                "persisted": save_error.is_none(),
            }),
        )
    }

    /// Send an encrypted DM to a peer given as npub or hex. Returns the event id.
    pub async fn contact_agent(&self, peer: &str, message: &str) -> ReachResult<String> {
        let guard = self.running.lock().await;
        let running = guard.as_ref().ok_or(ReachError::NotRunning)?;
        let recipient = parse_peer_id(peer)?;
        running.publisher.send_direct_message(&recipient, message).await
    }

    /// See [`AgentQuery::discover_agents`].
    pub fn discover_agents(&self, capability: Option<&str>, limit: Option<usize>) -> Option<Vec<Agent>> {
        self.query().discover_agents(capability, limit)
    }

    /// See [`AgentQuery::get_agent`].
    pub fn get_agent(&self, peer: &str) -> ReachResult<Option<Agent>> {
        self.query().get_agent(peer)
    }
}

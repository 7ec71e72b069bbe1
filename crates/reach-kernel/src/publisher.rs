//! Outbound path: our service card, our heartbeats, and direct messages.
//!
//! Every publish goes to all relays at once and settles before returning.
//! Relay failures are logged, never fatal, except that a DM nobody accepted
//! is reported back to the caller.

use crate::ticker::PeriodicTask;
use nostr::PublicKey;
use reach_types::config::ProfileConfig;
use reach_types::identity::short_hex;
use reach_types::{CardBody, Identity, LocalCardState, Protocol, ReachError, ReachResult, Status};
use reach_wire::{codec, PublishReport, RelayPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Publishes our own events and owns the heartbeat timer.
pub struct Publisher {
    identity: Arc<Identity>,
    pool: Arc<dyn RelayPool>,
    profile: ProfileConfig,
    heartbeat_timer: PeriodicTask,
}

impl Publisher {
    pub fn new(identity: Arc<Identity>, pool: Arc<dyn RelayPool>, profile: ProfileConfig) -> Self {
        Self {
            identity,
            pool,
            profile,
            heartbeat_timer: PeriodicTask::new("heartbeat"),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The card we advertise for `state`. Local state overrides the profile.
    pub fn card_body(&self, state: &LocalCardState) -> CardBody {
        let mut protocols = Vec::new();
        if self.profile.advertise_dm {
            protocols.push(Protocol::Dm {
                relays: self.pool.relays().join(","),
            });
        }
        CardBody {
            card_id: self.identity.card_id(),
            name: state
                .name
                .clone()
                .unwrap_or_else(|| self.profile.name.clone()),
            about: state
                .about
                .clone()
                .unwrap_or_else(|| self.profile.about.clone()),
            capabilities: state.capabilities.clone(),
            protocols,
            color: self.profile.color.clone(),
            avatar: self.profile.avatar.clone(),
            banner: self.profile.banner.clone(),
        }
    }

    /// Build, sign and publish our service card.
    pub async fn publish_service_card(&self, state: &LocalCardState) -> ReachResult<PublishReport> {
        let body = self.card_body(state);
        let event = codec::build_service_card(&self.identity, &body)?;
        let report = self.pool.publish(&event).await;
        info!(
            card_id = %body.card_id,
            capabilities = %state.capability_summary(),
            accepted = report.accepted(),
            relays = report.outcomes.len(),
            "Service card published"
        );
        Ok(report)
    }

    pub async fn send_heartbeat(&self, status: Status) -> ReachResult<PublishReport> {
        emit_heartbeat(&self.identity, self.pool.as_ref(), status).await
    }

    /// Encrypt and send a DM. Returns the event id.
    pub async fn send_direct_message(
        &self,
        recipient: &PublicKey,
        plaintext: &str,
    ) -> ReachResult<String> {
        let event = codec::build_direct_message(&self.identity, recipient, plaintext)?;
        let report = self.pool.publish(&event).await;
        let to = recipient.to_hex();
        if !report.any_accepted() {
            return Err(ReachError::Relay(format!(
                "no relay accepted the message to {}",
                short_hex(&to)
            )));
        }
        info!(to = %short_hex(&to), event_id = %short_hex(&report.event_id), accepted = report.accepted(), "Direct message sent");
        Ok(report.event_id)
    }

    /// Start (or restart) periodic `available` heartbeats.
    pub fn start_heartbeats(&self, interval: Duration) {
        let identity = Arc::clone(&self.identity);
        let pool = Arc::clone(&self.pool);
        self.heartbeat_timer.restart(interval, move || {
            let identity = Arc::clone(&identity);
            let pool = Arc::clone(&pool);
            async move {
                if let Err(e) = emit_heartbeat(&identity, pool.as_ref(), Status::Available).await {
                    warn!(error = %e, "Periodic heartbeat failed");
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "Heartbeat timer started");
    }

    pub fn stop_heartbeats(&self) {
        self.heartbeat_timer.stop();
    }

    pub fn heartbeats_running(&self) -> bool {
        self.heartbeat_timer.is_running()
    }

    /// Apply a presence change between two local states.
    ///
    /// Going offline stops the timer, then sends one `maintenance`
    /// heartbeat. Coming online sends one `available` heartbeat, then
    /// resumes the timer. An interval change while online restarts the timer.
    pub async fn apply_presence(&self, before: &LocalCardState, after: &LocalCardState) {
        match (before.is_online(), after.is_online()) {
            (true, false) => {
                self.stop_heartbeats();
                if let Err(e) = self.send_heartbeat(Status::Maintenance).await {
                    warn!(error = %e, "Failed to send maintenance heartbeat");
                }
                info!("Agent is now offline");
            }
            (false, true) => {
                if let Err(e) = self.send_heartbeat(Status::Available).await {
                    warn!(error = %e, "Failed to send available heartbeat");
                }
                self.start_heartbeats(after.heartbeat_interval());
                info!("Agent is now online");
            }
            (true, true) if before.heartbeat_interval() != after.heartbeat_interval() => {
                self.start_heartbeats(after.heartbeat_interval());
            }
            _ => {}
        }
    }
}

async fn emit_heartbeat(
    identity: &Identity,
    pool: &dyn RelayPool,
    status: Status,
) -> ReachResult<PublishReport> {
    let event = codec::build_heartbeat(identity, &identity.card_id(), status)?;
    let report = pool.publish(&event).await;
    debug!(%status, accepted = report.accepted(), "Heartbeat sent");
    Ok(report)
}

//! Reconciliation engine: merges every relay's view into one agent directory.
//!
//! Relays deliver out of order and more than once. The [`AgentDirectory`]
//! absorbs that with three rules:
//!
//! - **Monotonic replace**: a card or heartbeat replaces the held one only
//!   when strictly newer; on a timestamp tie the first arrival stays.
//! - **Pending heartbeats**: a heartbeat for a key with no card yet waits in
//!   a one-slot-per-key buffer and is attached the moment the card arrives.
//!   Buffered entries expire once they leave the liveness window.
//! - **Sync gate**: snapshots are withheld until the initial catch-up of both
//!   kinds has been applied, so readers never see a half-filled directory.
//!
//! Liveness is never stored; every snapshot recomputes it from the clock.

use crate::unix_now;
use nostr::Event;
use reach_types::config::DiscoveryConfig;
use reach_types::identity::short_hex;
use reach_types::{Agent, Heartbeat, ReachResult, ServiceCard, LIVENESS_WINDOW_SECS};
use reach_wire::codec::{self, KIND_HEARTBEAT, KIND_METADATA, KIND_SERVICE_CARD, LABEL_NAMESPACE};
use reach_wire::{RelayFilter, RelayPool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What applying one record did to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First card for this key.
    Created,
    /// A newer card replaced the held one.
    Replaced,
    /// A heartbeat was attached to a known agent.
    Attached,
    /// A heartbeat for an unknown key was buffered.
    Pending,
    /// Stale or duplicate; nothing changed.
    Unchanged,
}

/// Result of draining the pending buffer after catch-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attached: usize,
    pub expired: usize,
    pub retained: usize,
}

#[derive(Default)]
struct DirectoryState {
    cards: HashMap<String, ServiceCard>,
    heartbeats: HashMap<String, Heartbeat>,
    pending: HashMap<String, Heartbeat>,
    /// Kind-0 profile pictures: pubkey -> (created_at, url).
    pictures: HashMap<String, (u64, String)>,
    syncing: bool,
}

impl DirectoryState {
    /// Store `hb` in `slot` if it is strictly newer than the held one.
    fn replace_if_newer(slot: &mut HashMap<String, Heartbeat>, hb: Heartbeat) -> bool {
        match slot.get(&hb.pubkey) {
            Some(held) if held.created_at >= hb.created_at => false,
            _ => {
                slot.insert(hb.pubkey.clone(), hb);
                true
            }
        }
    }

    fn build_agent(&self, card: &ServiceCard, now: u64) -> Agent {
        let mut card = card.clone();
        if card.body.avatar.is_none() {
            if let Some((_, url)) = self.pictures.get(&card.pubkey) {
                card.body.avatar = Some(url.clone());
            }
        }
        let heartbeat = self.heartbeats.get(&card.pubkey).cloned();
        Agent::at(card, heartbeat, now)
    }
}

/// The merged view of every known remote agent.
///
/// All mutation happens under one write lock, so replace-if-newer checks
/// and buffer hand-offs are never interleaved.
pub struct AgentDirectory {
    state: RwLock<DirectoryState>,
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentDirectory {
    /// An empty directory, gated until [`finish_sync`](Self::finish_sync).
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DirectoryState {
                syncing: true,
                ..Default::default()
            }),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge a service card.
    pub fn apply_card(&self, card: ServiceCard) -> MergeOutcome {
        let mut state = self.write();
        let pubkey = card.pubkey.clone();

        let outcome = match state.cards.get(&pubkey) {
            Some(held) if held.created_at >= card.created_at => return MergeOutcome::Unchanged,
            Some(_) => MergeOutcome::Replaced,
            None => MergeOutcome::Created,
        };
        debug!(pubkey = %short_hex(&pubkey), name = %card.body.name, ?outcome, "Card merged");
        state.cards.insert(pubkey.clone(), card);

        if let Some(hb) = state.pending.remove(&pubkey) {
            debug!(pubkey = %short_hex(&pubkey), "Attaching pending heartbeat");
            DirectoryState::replace_if_newer(&mut state.heartbeats, hb);
        }
        outcome
    }

    /// Merge a heartbeat received at `now`.
    ///
    /// Heartbeats for unknown keys are buffered; buffered entries that have
    /// left the liveness window are swept on every buffered arrival, and an
    /// arrival already outside the window is not buffered at all.
    pub fn apply_heartbeat(&self, hb: Heartbeat, now: u64) -> MergeOutcome {
        let mut state = self.write();
        if state.cards.contains_key(&hb.pubkey) {
            return if DirectoryState::replace_if_newer(&mut state.heartbeats, hb) {
                MergeOutcome::Attached
            } else {
                MergeOutcome::Unchanged
            };
        }

        let expired = |hb: &Heartbeat| now.saturating_sub(hb.created_at) >= LIVENESS_WINDOW_SECS;
        let before = state.pending.len();
        state.pending.retain(|_, held| !expired(held));
        let swept = before - state.pending.len();
        if swept > 0 {
            debug!(swept, "Expired pending heartbeats");
        }
        if expired(&hb) {
            return MergeOutcome::Unchanged;
        }
        if DirectoryState::replace_if_newer(&mut state.pending, hb) {
            MergeOutcome::Pending
        } else {
            MergeOutcome::Unchanged
        }
    }

    /// Decode and merge a raw event. Malformed or foreign events are skipped.
    pub fn apply_event(&self, event: &Event) -> Option<MergeOutcome> {
        let kind = event.kind.as_u16();
        let result = match kind {
            KIND_SERVICE_CARD => codec::parse_service_card(event).map(|c| self.apply_card(c)),
            KIND_HEARTBEAT => {
                codec::parse_heartbeat(event).map(|h| self.apply_heartbeat(h, unix_now()))
            }
            KIND_METADATA => {
                if let Some(url) = codec::parse_profile_picture(event) {
                    self.set_profile_picture(&event.pubkey.to_hex(), event.created_at.as_u64(), url);
                }
                return None;
            }
            _ => return None,
        };
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(kind, event_id = %short_hex(&event.id.to_hex()), error = %e, "Skipping malformed event");
                None
            }
        }
    }

    /// Record a kind-0 profile picture, newest per author.
    pub fn set_profile_picture(&self, pubkey: &str, created_at: u64, url: String) {
        let mut state = self.write();
        match state.pictures.get(pubkey) {
            Some((held, _)) if *held >= created_at => {}
            _ => {
                state.pictures.insert(pubkey.to_string(), (created_at, url));
            }
        }
    }

    /// Close the sync gate (catch-up in progress).
    pub fn begin_sync(&self) {
        self.write().syncing = true;
    }

    /// Open the sync gate and drain the pending buffer once.
    ///
    /// Entries whose card has arrived are attached, entries already outside
    /// the liveness window are dropped, the rest keep waiting.
    pub fn finish_sync(&self, now: u64) -> DrainReport {
        let mut state = self.write();
        let mut report = DrainReport::default();
        let pending = std::mem::take(&mut state.pending);
        for (pubkey, hb) in pending {
            if state.cards.contains_key(&pubkey) {
                DirectoryState::replace_if_newer(&mut state.heartbeats, hb);
                report.attached += 1;
            } else if now.saturating_sub(hb.created_at) >= LIVENESS_WINDOW_SECS {
                report.expired += 1;
            } else {
                state.pending.insert(pubkey, hb);
                report.retained += 1;
            }
        }
        state.syncing = false;
        report
    }

    pub fn is_syncing(&self) -> bool {
        self.read().syncing
    }

    /// Every known agent evaluated at `now`, ordered by public key.
    /// `None` while the initial catch-up is still running.
    pub fn snapshot(&self, now: u64) -> Option<Vec<Agent>> {
        let state = self.read();
        if state.syncing {
            return None;
        }
        let mut agents: Vec<Agent> = state
            .cards
            .values()
            .map(|card| state.build_agent(card, now))
            .collect();
        agents.sort_by(|a, b| a.card.pubkey.cmp(&b.card.pubkey));
        Some(agents)
    }

    /// One agent by canonical hex public key.
    pub fn agent(&self, pubkey: &str, now: u64) -> Option<Agent> {
        let state = self.read();
        state
            .cards
            .get(pubkey)
            .map(|card| state.build_agent(card, now))
    }

    pub fn len(&self) -> usize {
        self.read().cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.read().pending.len()
    }

    /// Public keys whose card carries no avatar.
    fn keys_without_avatar(&self) -> Vec<String> {
        self.read()
            .cards
            .values()
            .filter(|c| c.body.avatar.is_none())
            .map(|c| c.pubkey.clone())
            .collect()
    }
}

/// Filter for every service card in the namespace.
pub fn card_filter() -> RelayFilter {
    RelayFilter::new()
        .kind(KIND_SERVICE_CARD)
        .tag('L', LABEL_NAMESPACE)
}

/// Filter for every heartbeat in the namespace.
pub fn heartbeat_filter() -> RelayFilter {
    RelayFilter::new()
        .kind(KIND_HEARTBEAT)
        .tag('L', LABEL_NAMESPACE)
}

/// Counts from one catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub cards: usize,
    pub heartbeats: usize,
    pub profiles: usize,
    pub drain: DrainReport,
}

/// Drives an [`AgentDirectory`] from a relay pool: one catch-up query per
/// kind, then one live subscription per kind.
pub struct ReconciliationEngine {
    directory: Arc<AgentDirectory>,
    pool: Arc<dyn RelayPool>,
    discovery: DiscoveryConfig,
    query_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconciliationEngine {
    pub fn new(
        directory: Arc<AgentDirectory>,
        pool: Arc<dyn RelayPool>,
        discovery: DiscoveryConfig,
        query_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            directory,
            pool,
            discovery,
            query_timeout,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    /// Catch up, then follow live.
    pub async fn start(&self) -> ReachResult<CatchUpReport> {
        let since = unix_now();
        let report = self.catch_up().await;
        self.subscribe(since).await?;
        Ok(report)
    }

    /// Query stored cards and recent heartbeats, apply them, then open the
    /// sync gate.
    pub async fn catch_up(&self) -> CatchUpReport {
        self.directory.begin_sync();
        let now = unix_now();

        let cards_filter = card_filter().limit(self.discovery.card_query_limit);
        let heartbeats_filter = heartbeat_filter()
            .since(now.saturating_sub(self.discovery.heartbeat_lookback_secs))
            .limit(self.discovery.heartbeat_query_limit);

        let (cards, heartbeats) = tokio::join!(
            self.pool.query(&cards_filter, self.query_timeout),
            self.pool.query(&heartbeats_filter, self.query_timeout),
        );
        let cards = cards.unwrap_or_else(|e| {
            warn!(error = %e, "Card catch-up query failed");
            Vec::new()
        });
        let heartbeats = heartbeats.unwrap_or_else(|e| {
            warn!(error = %e, "Heartbeat catch-up query failed");
            Vec::new()
        });

        let mut report = CatchUpReport {
            cards: cards.len(),
            heartbeats: heartbeats.len(),
            ..Default::default()
        };
        for event in cards.iter().chain(heartbeats.iter()) {
            self.directory.apply_event(event);
        }

        if self.discovery.fetch_profiles {
            report.profiles = self.fetch_profiles().await;
        }

        report.drain = self.directory.finish_sync(unix_now());
        info!(
            agents = self.directory.len(),
            cards = report.cards,
            heartbeats = report.heartbeats,
            pending = report.drain.retained,
            expired = report.drain.expired,
            "Directory catch-up complete"
        );
        report
    }

    async fn fetch_profiles(&self) -> usize {
        let authors = self.directory.keys_without_avatar();
        if authors.is_empty() {
            return 0;
        }
        let filter = RelayFilter::new()
            .kind(KIND_METADATA)
            .authors(authors.iter().cloned())
            .limit(authors.len());
        match self.pool.query(&filter, self.query_timeout).await {
            Ok(events) => {
                for event in &events {
                    self.directory.apply_event(event);
                }
                events.len()
            }
            Err(e) => {
                warn!(error = %e, "Profile query failed");
                0
            }
        }
    }

    /// Open one live subscription per kind, starting at `since`.
    pub async fn subscribe(&self, since: u64) -> ReachResult<()> {
        self.shutdown_tx.send_replace(false);
        for filter in [card_filter().since(since), heartbeat_filter().since(since)] {
            let mut sub = self.pool.subscribe(filter).await?;
            let directory = Arc::clone(&self.directory);
            let mut shutdown = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            sub.close();
                            break;
                        }
                        event = sub.recv() => match event {
                            Some(event) => {
                                directory.apply_event(&event);
                            }
                            None => break,
                        },
                    }
                }
                debug!(sub = %sub.id(), "Directory subscription closed");
            });
            self.tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }
        Ok(())
    }

    /// Close all live subscriptions.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        futures::future::join_all(handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_types::{CardBody, Capability, Status};

    const NOW: u64 = 1_700_000_000;

    fn card(pubkey: &str, created_at: u64, name: &str) -> ServiceCard {
        ServiceCard {
            pubkey: pubkey.to_string(),
            event_id: format!("{name}-{created_at}"),
            created_at,
            body: CardBody {
                card_id: format!("{}-v1", &pubkey[..8]),
                name: name.to_string(),
                capabilities: vec![Capability::new("coding", "")],
                ..Default::default()
            },
        }
    }

    fn hb(pubkey: &str, created_at: u64, status: Status) -> Heartbeat {
        Heartbeat {
            pubkey: pubkey.to_string(),
            card_id: format!("{}-v1", &pubkey[..8]),
            status,
            created_at,
            event_id: format!("hb-{created_at}"),
        }
    }

    fn ready() -> AgentDirectory {
        let dir = AgentDirectory::new();
        dir.finish_sync(NOW);
        dir
    }

    fn key(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    #[test]
    fn test_same_card_applied_many_times_is_idempotent() {
        let once = ready();
        once.apply_card(card(&key(1), NOW, "a"));

        let many = ready();
        assert_eq!(many.apply_card(card(&key(1), NOW, "a")), MergeOutcome::Created);
        for _ in 0..5 {
            assert_eq!(
                many.apply_card(card(&key(1), NOW, "a")),
                MergeOutcome::Unchanged
            );
        }
        assert_eq!(once.snapshot(NOW), many.snapshot(NOW));
    }

    #[test]
    fn test_newest_card_wins_in_any_order() {
        for order in [[NOW - 10, NOW], [NOW, NOW - 10]] {
            let dir = ready();
            for t in order {
                dir.apply_card(card(&key(1), t, &format!("v{t}")));
            }
            let agent = dir.agent(&key(1), NOW).unwrap();
            assert_eq!(agent.card.created_at, NOW);
        }
    }

    #[test]
    fn test_timestamp_tie_keeps_first_arrival() {
        let dir = ready();
        dir.apply_card(card(&key(1), NOW, "first"));
        assert_eq!(
            dir.apply_card(card(&key(1), NOW, "second")),
            MergeOutcome::Unchanged
        );
        assert_eq!(dir.agent(&key(1), NOW).unwrap().card.body.name, "first");
    }

    #[test]
    fn test_heartbeat_before_card_converges() {
        let hb_first = ready();
        assert_eq!(
            hb_first.apply_heartbeat(hb(&key(1), NOW - 5, Status::Available), NOW),
            MergeOutcome::Pending
        );
        assert_eq!(hb_first.pending_len(), 1);
        hb_first.apply_card(card(&key(1), NOW - 60, "a"));
        assert_eq!(hb_first.pending_len(), 0);

        let card_first = ready();
        card_first.apply_card(card(&key(1), NOW - 60, "a"));
        assert_eq!(
            card_first.apply_heartbeat(hb(&key(1), NOW - 5, Status::Available), NOW),
            MergeOutcome::Attached
        );

        let a = hb_first.agent(&key(1), NOW).unwrap();
        let b = card_first.agent(&key(1), NOW).unwrap();
        assert_eq!(a, b);
        assert!(a.is_online);
        assert_eq!(a.last_seen, Some(NOW - 5));
    }

    #[test]
    fn test_pending_keeps_newest_only() {
        let dir = ready();
        dir.apply_heartbeat(hb(&key(1), NOW - 5, Status::Busy), NOW);
        assert_eq!(
            dir.apply_heartbeat(hb(&key(1), NOW - 50, Status::Available), NOW),
            MergeOutcome::Unchanged
        );
        dir.apply_card(card(&key(1), NOW, "a"));
        let agent = dir.agent(&key(1), NOW).unwrap();
        assert_eq!(agent.heartbeat.unwrap().status, Status::Busy);
    }

    #[test]
    fn test_older_heartbeat_ignored() {
        let dir = ready();
        dir.apply_card(card(&key(1), NOW, "a"));
        dir.apply_heartbeat(hb(&key(1), NOW - 5, Status::Available), NOW);
        assert_eq!(
            dir.apply_heartbeat(hb(&key(1), NOW - 500, Status::Maintenance), NOW),
            MergeOutcome::Unchanged
        );
        assert!(dir.agent(&key(1), NOW).unwrap().is_online);
    }

    #[test]
    fn test_liveness_decays_without_new_events() {
        let dir = ready();
        dir.apply_card(card(&key(1), NOW - 1000, "a"));
        dir.apply_heartbeat(hb(&key(1), NOW, Status::Available), NOW);
        assert!(dir.snapshot(NOW + 899).unwrap()[0].is_online);
        assert!(!dir.snapshot(NOW + 901).unwrap()[0].is_online);
    }

    #[test]
    fn test_maintenance_is_offline_even_when_fresh() {
        let dir = ready();
        dir.apply_card(card(&key(1), NOW, "a"));
        dir.apply_heartbeat(hb(&key(1), NOW, Status::Maintenance), NOW);
        assert!(!dir.agent(&key(1), NOW).unwrap().is_online);
    }

    #[test]
    fn test_snapshot_gated_until_sync() {
        let dir = AgentDirectory::new();
        dir.apply_card(card(&key(1), NOW, "a"));
        assert!(dir.snapshot(NOW).is_none());
        dir.finish_sync(NOW);
        assert_eq!(dir.snapshot(NOW).unwrap().len(), 1);
    }

    #[test]
    fn test_drain_after_sync() {
        let dir = AgentDirectory::new();
        dir.apply_heartbeat(hb(&key(1), NOW - 10, Status::Available), NOW);
        dir.apply_heartbeat(hb(&key(2), NOW - 2000, Status::Available), NOW - 1990);
        let report = dir.finish_sync(NOW);
        assert_eq!(
            report,
            DrainReport {
                attached: 0,
                expired: 1,
                retained: 1
            }
        );
        assert_eq!(dir.pending_len(), 1);
        dir.apply_card(card(&key(1), NOW, "late"));
        assert!(dir.agent(&key(1), NOW).unwrap().is_online);
    }

    #[test]
    fn test_live_pending_heartbeats_expire() {
        let dir = ready();
        for n in 0..200u8 {
            dir.apply_heartbeat(hb(&key(n), NOW - 5000, Status::Available), NOW - 4990);
        }
        assert_eq!(dir.pending_len(), 200);

        assert_eq!(
            dir.apply_heartbeat(hb(&key(250), NOW - 5, Status::Available), NOW),
            MergeOutcome::Pending
        );
        assert_eq!(dir.pending_len(), 1);

        assert_eq!(
            dir.apply_heartbeat(hb(&key(251), NOW - 1000, Status::Available), NOW),
            MergeOutcome::Unchanged
        );
        assert_eq!(dir.pending_len(), 1);

        dir.apply_card(card(&key(250), NOW, "late"));
        assert!(dir.agent(&key(250), NOW).unwrap().is_online);
    }

    #[test]
    fn test_profile_picture_fallback() {
        let dir = ready();
        dir.apply_card(card(&key(1), NOW, "a"));
        dir.set_profile_picture(&key(1), 10, "https://old".to_string());
        dir.set_profile_picture(&key(1), 20, "https://new".to_string());
        dir.set_profile_picture(&key(1), 15, "https://middle".to_string());
        let agent = dir.agent(&key(1), NOW).unwrap();
        assert_eq!(agent.card.body.avatar.as_deref(), Some("https://new"));

        let mut with_avatar = card(&key(2), NOW, "b");
        with_avatar.body.avatar = Some("https://own".to_string());
        dir.apply_card(with_avatar);
        dir.set_profile_picture(&key(2), 30, "https://profile".to_string());
        assert_eq!(
            dir.agent(&key(2), NOW).unwrap().card.body.avatar.as_deref(),
            Some("https://own")
        );
    }
}

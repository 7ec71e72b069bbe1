//! Inbound direct messages.
//!
//! Relays are asked for DMs addressed to us from allow-listed authors only,
//! but nothing a relay sends is trusted: every event is checked again here
//! before it is decrypted and handed to the host.

use crate::config::normalize_allow_list;
use crate::host::HostBridge;
use crate::unix_now;
use nostr::Event;
use reach_memory::{DedupLedger, DmState, DmStateStore};
use reach_types::config::DmConfig;
use reach_types::identity::{npub_from_hex, short_hex};
use reach_types::{Identity, ReachResult};
use reach_wire::codec::{self, KIND_DIRECT_MESSAGE};
use reach_wire::{RelayFilter, RelayPool};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay between the last delivered message and the cursor save.
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(5);

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmOutcome {
    /// Injected into the host session.
    Delivered,
    /// Decrypted but only logged (no host, or the host refused it).
    LoggedOnly,
    /// Already processed.
    Duplicate,
    /// Sent by ourselves.
    OwnMessage,
    /// No `p` tag naming us.
    NotAddressed,
    /// Sender not on the allow-list.
    Rejected,
    /// Could not be decrypted with our key.
    DecryptFailed,
}

struct GatewayState {
    ledger: DedupLedger,
    last_seen_at: u64,
}

/// Receives, filters, decrypts and delivers DMs.
pub struct DmGateway {
    identity: Arc<Identity>,
    pool: Arc<dyn RelayPool>,
    host: Option<Arc<dyn HostBridge>>,
    allow_list: HashSet<String>,
    session_key: String,
    lookback_secs: u64,
    store: DmStateStore,
    state: Mutex<GatewayState>,
    dirty: Notify,
    shutdown_tx: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl DmGateway {
    pub fn new(
        identity: Arc<Identity>,
        pool: Arc<dyn RelayPool>,
        host: Option<Arc<dyn HostBridge>>,
        config: &DmConfig,
        store: DmStateStore,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            identity,
            pool,
            host,
            allow_list: normalize_allow_list(&config.allow_list).into_iter().collect(),
            session_key: config.session_key.clone(),
            lookback_secs: config.lookback_secs,
            store,
            state: Mutex::new(GatewayState {
                ledger: DedupLedger::default(),
                last_seen_at: 0,
            }),
            dirty: Notify::new(),
            shutdown_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Load the cursor and subscribe. Returns once the subscription is open.
    pub async fn start(self: &Arc<Self>) -> ReachResult<()> {
        let saved = self.store.load(unix_now()).await;
        let since = saved.last_seen_at.saturating_sub(self.lookback_secs);
        {
            let mut state = self.state.lock().await;
            state.ledger = saved.ledger();
            state.last_seen_at = saved.last_seen_at;
        }

        let filter = RelayFilter::new()
            .kind(KIND_DIRECT_MESSAGE)
            .tag('p', self.identity.public_key_hex())
            .authors(self.allow_list.iter().cloned())
            .since(since);
        let mut sub = self.pool.subscribe(filter).await?;
        self.shutdown_tx.send_replace(false);

        let gateway = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let listener = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        sub.close();
                        break;
                    }
                    event = sub.recv() => match event {
                        Some(event) => {
                            gateway.handle_event(&event).await;
                        }
                        None => break,
                    },
                }
            }
        });

        let gateway = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let saver = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = gateway.dirty.notified() => {}
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(SAVE_DEBOUNCE) => {}
                }
                gateway.flush().await;
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([listener, saver]);
        info!(
            allowed = self.allow_list.len(),
            since,
            "DM gateway listening"
        );
        Ok(())
    }

    /// Stop listening and persist the cursor.
    pub async fn stop(&self) {
        self.close().await;
        self.flush().await;
    }

    /// Close the subscription and wait for the listener tasks. Does not save.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        futures::future::join_all(handles).await;
    }

    /// Persist the cursor and processed ids now.
    pub async fn flush(&self) {
        let snapshot = {
            let state = self.state.lock().await;
            DmState {
                last_seen_at: state.last_seen_at,
                seen_ids: state.ledger.ids(),
            }
        };
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, path = %self.store.path().display(), "Failed to save DM state");
        }
    }

    /// Newest delivered `created_at`.
    pub async fn last_seen_at(&self) -> u64 {
        self.state.lock().await.last_seen_at
    }

    /// Run one inbound event through every check and deliver it.
    pub async fn handle_event(&self, event: &Event) -> DmOutcome {
        let event_id = event.id.to_hex();
        if self.state.lock().await.ledger.contains(&event_id) {
            debug!(event_id = %short_hex(&event_id), "Duplicate DM skipped");
            return DmOutcome::Duplicate;
        }

        let sender = event.pubkey.to_hex();
        let own = self.identity.public_key_hex();
        if sender == own {
            return DmOutcome::OwnMessage;
        }
        if event.kind.as_u16() != KIND_DIRECT_MESSAGE
            || !codec::recipients(event).iter().any(|p| p == own)
        {
            debug!(event_id = %short_hex(&event_id), "DM not addressed to us");
            return DmOutcome::NotAddressed;
        }
        if !self.allow_list.contains(&sender) {
            debug!(from = %short_hex(&sender), "DM from sender outside allow-list dropped");
            return DmOutcome::Rejected;
        }
        // Only allow-listed traffic takes ledger slots.
        if !self.state.lock().await.ledger.insert(event_id.clone()) {
            debug!(event_id = %short_hex(&event_id), "Duplicate DM skipped");
            return DmOutcome::Duplicate;
        }

        let plaintext = match codec::decrypt_direct_message(&self.identity, event) {
            Ok(p) => p,
            Err(e) => {
                warn!(from = %short_hex(&sender), error = %e, "Failed to decrypt DM");
                return DmOutcome::DecryptFailed;
            }
        };

        {
            let mut state = self.state.lock().await;
            state.last_seen_at = state.last_seen_at.max(event.created_at.as_u64());
        }
        self.dirty.notify_one();

        let npub = npub_from_hex(&sender);
        self.deliver(&npub, &plaintext).await
    }

    async fn deliver(&self, npub: &str, plaintext: &str) -> DmOutcome {
        let text = format!("[Nostr DM from {npub}]\n{plaintext}");
        let Some(host) = &self.host else {
            info!(from = %npub, message = %plaintext, "DM received (no host attached)");
            return DmOutcome::LoggedOnly;
        };
        match host.inject_system_event(&text, &self.session_key).await {
            Ok(()) => {
                host.request_wake().await;
                info!(from = %npub, "DM delivered to host session");
                DmOutcome::Delivered
            }
            Err(e) => {
                warn!(from = %npub, error = %e, message = %plaintext, "Host rejected DM, logged only");
                DmOutcome::LoggedOnly
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;
    use async_trait::async_trait;
    use reach_memory::ledger::DEFAULT_LEDGER_CAPACITY;
    use reach_wire::InMemoryRelayPool;

    #[derive(Default)]
    struct Recorder {
        injected: std::sync::Mutex<Vec<(String, String)>>,
        wakes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl HostBridge for Recorder {
        fn register_tools(&self, _tools: Vec<ToolDefinition>) {}

        async fn inject_system_event(&self, text: &str, session_key: &str) -> ReachResult<()> {
            self.injected
                .lock()
                .unwrap()
                .push((text.to_string(), session_key.to_string()));
            Ok(())
        }

        async fn request_wake(&self) {
            self.wakes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct Fixture {
        gateway: DmGateway,
        me: Identity,
        friend: Identity,
        host: Arc<Recorder>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let me = Identity::generate();
        let friend = Identity::generate();
        let host = Arc::new(Recorder::default());
        let dir = tempfile::tempdir().unwrap();
        let config = DmConfig {
            allow_list: vec![friend.npub().to_string()],
            ..Default::default()
        };
        let gateway = DmGateway::new(
            Arc::new(me.clone()),
            Arc::new(InMemoryRelayPool::new(["wss://a"])),
            Some(host.clone() as Arc<dyn HostBridge>),
            &config,
            DmStateStore::new(dir.path().join("dm.json")),
        );
        Fixture {
            gateway,
            me,
            friend,
            host,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_allowed_dm_is_injected() {
        let f = fixture();
        let event = codec::build_direct_message(&f.friend, &f.me.public_key(), "ping").unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::Delivered);

        let injected = f.host.injected.lock().unwrap().clone();
        assert_eq!(
            injected,
            vec![(
                format!("[Nostr DM from {}]\nping", f.friend.npub()),
                "agent:main:main".to_string()
            )]
        );
        assert_eq!(f.host.wakes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(f.gateway.last_seen_at().await, event.created_at.as_u64());
    }

    #[tokio::test]
    async fn test_stranger_dm_is_dropped_silently() {
        let f = fixture();
        let stranger = Identity::generate();
        let event = codec::build_direct_message(&stranger, &f.me.public_key(), "hi").unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::Rejected);
        assert!(f.host.injected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_dm_injected_once() {
        let f = fixture();
        let event = codec::build_direct_message(&f.friend, &f.me.public_key(), "once").unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::Delivered);
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::Duplicate);
        assert_eq!(f.host.injected.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_dms_do_not_evict_delivered_ids() {
        let f = fixture();
        let event = codec::build_direct_message(&f.friend, &f.me.public_key(), "keep").unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::Delivered);

        let stranger = Identity::generate();
        let other = Identity::generate();
        for i in 0..DEFAULT_LEDGER_CAPACITY {
            let text = format!("spam {i}");
            let spam = codec::build_direct_message(&stranger, &f.me.public_key(), &text).unwrap();
            assert_eq!(f.gateway.handle_event(&spam).await, DmOutcome::Rejected);
        }
        let misrouted =
            codec::build_direct_message(&f.friend, &other.public_key(), "elsewhere").unwrap();
        assert_eq!(f.gateway.handle_event(&misrouted).await, DmOutcome::NotAddressed);

        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::Duplicate);
        assert_eq!(f.host.injected.lock().unwrap().len(), 1);

        f.gateway.flush().await;
        let saved = f.gateway.store.load(0).await;
        assert_eq!(saved.seen_ids, vec![event.id.to_hex()]);
    }

    #[tokio::test]
    async fn test_dm_for_someone_else() {
        let f = fixture();
        let other = Identity::generate();
        let event = codec::build_direct_message(&f.friend, &other.public_key(), "x").unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::NotAddressed);
    }

    #[tokio::test]
    async fn test_own_dm_skipped() {
        let f = fixture();
        let event = codec::build_direct_message(&f.me, &f.friend.public_key(), "x").unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::OwnMessage);
    }

    #[tokio::test]
    async fn test_undecryptable_dm_skipped() {
        let f = fixture();
        // Encrypted for someone else but tagged to us.
        let other = Identity::generate();
        let inner = codec::build_direct_message(&f.friend, &other.public_key(), "x").unwrap();
        let event = nostr::EventBuilder::new(nostr::Kind::Custom(KIND_DIRECT_MESSAGE), inner.content)
            .tag(nostr::Tag::public_key(f.me.public_key()))
            .sign_with_keys(f.friend.keys())
            .unwrap();
        assert_eq!(f.gateway.handle_event(&event).await, DmOutcome::DecryptFailed);
        assert!(f.host.injected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_persists_cursor_and_ids() {
        let f = fixture();
        let event = codec::build_direct_message(&f.friend, &f.me.public_key(), "x").unwrap();
        f.gateway.handle_event(&event).await;
        f.gateway.flush().await;

        let saved = f.gateway.store.load(0).await;
        assert_eq!(saved.last_seen_at, event.created_at.as_u64());
        assert_eq!(saved.seen_ids, vec![event.id.to_hex()]);
    }
}

//! In-process relay pool for offline runs and tests.
//!
//! Each relay keeps its own event store, so publishing to N relays and then
//! subscribing delivers every event N times, the same way redundant relay
//! connections do on the real network.

use crate::error::{WireError, WireResult};
use crate::filter::RelayFilter;
use crate::pool::{PublishReport, RelayOutcome, RelayPool, RelayStatus, Subscription};
use async_trait::async_trait;
use nostr::Event;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::warn;

const SUBSCRIPTION_BUFFER: usize = 4096;

struct MemRelay {
    url: String,
    events: Vec<Event>,
    /// Events received through `publish` on this pool, in order.
    published: Vec<Event>,
    failing: bool,
}

struct Subscriber {
    filter: RelayFilter,
    tx: mpsc::Sender<Event>,
    closed: watch::Receiver<bool>,
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }

    fn offer(&self, event: &Event) {
        if self.is_closed() || !self.filter.matches(event) {
            return;
        }
        if self.tx.try_send(event.clone()).is_err() {
            warn!("In-memory subscription buffer full, dropping event");
        }
    }
}

#[derive(Default)]
struct PoolState {
    relays: Vec<MemRelay>,
    subscribers: Vec<Subscriber>,
    disconnected: bool,
}

fn d_tag(event: &Event) -> Option<&str> {
    event.tags.iter().find_map(|t| match t.as_slice() {
        [name, value, ..] if name == "d" => Some(value.as_str()),
        _ => None,
    })
}

fn is_param_replaceable(kind: u16) -> bool {
    (30000..40000).contains(&kind)
}

#[derive(Debug, PartialEq, Eq)]
enum Stored {
    New,
    Duplicate,
    Stale,
}

impl MemRelay {
    /// Store with replaceable-event semantics.
    fn store(&mut self, event: &Event) -> Stored {
        if self.events.iter().any(|e| e.id == event.id) {
            return Stored::Duplicate;
        }
        let kind = event.kind.as_u16();
        if is_param_replaceable(kind) {
            let same_slot = |e: &Event| {
                e.kind.as_u16() == kind && e.pubkey == event.pubkey && d_tag(e) == d_tag(event)
            };
            if self
                .events
                .iter()
                .any(|e| same_slot(e) && e.created_at > event.created_at)
            {
                return Stored::Stale;
            }
            self.events.retain(|e| !same_slot(e));
        }
        self.events.push(event.clone());
        Stored::New
    }
}

/// A relay set that lives entirely in memory.
#[derive(Clone)]
pub struct InMemoryRelayPool {
    state: Arc<Mutex<PoolState>>,
}

impl InMemoryRelayPool {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let relays = urls
            .into_iter()
            .map(|url| MemRelay {
                url: url.into(),
                events: Vec::new(),
                published: Vec::new(),
                failing: false,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(PoolState {
                relays,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a relay reject every operation (or recover).
    pub fn set_failing(&self, url: &str, failing: bool) {
        let mut state = self.lock();
        if let Some(relay) = state.relays.iter_mut().find(|r| r.url == url) {
            relay.failing = failing;
        }
    }

    /// Events this pool published to `url`, in publish order.
    pub fn published(&self, url: &str) -> Vec<Event> {
        self.lock()
            .relays
            .iter()
            .find(|r| r.url == url)
            .map(|r| r.published.clone())
            .unwrap_or_default()
    }

    /// Number of events of `kind` this pool published to `url`.
    pub fn published_count(&self, url: &str, kind: u16) -> usize {
        self.published(url)
            .iter()
            .filter(|e| e.kind.as_u16() == kind)
            .count()
    }

    /// Deliver an event from some other client to every healthy relay.
    pub fn inject(&self, event: Event) {
        let mut state = self.lock();
        let PoolState {
            relays,
            subscribers,
            ..
        } = &mut *state;
        subscribers.retain(|s| !s.is_closed());
        for relay in relays.iter_mut().filter(|r| !r.failing) {
            if relay.store(&event) == Stored::New {
                for sub in subscribers.iter() {
                    sub.offer(&event);
                }
            }
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.is_closed());
        state.subscribers.len()
    }
}

#[async_trait]
impl RelayPool for InMemoryRelayPool {
    fn relays(&self) -> Vec<String> {
        self.lock().relays.iter().map(|r| r.url.clone()).collect()
    }

    async fn publish(&self, event: &Event) -> PublishReport {
        let mut state = self.lock();
        let PoolState {
            relays,
            subscribers,
            disconnected,
        } = &mut *state;
        subscribers.retain(|s| !s.is_closed());

        let outcomes = relays
            .iter_mut()
            .map(|relay| {
                if relay.failing || *disconnected {
                    return RelayOutcome {
                        url: relay.url.clone(),
                        ok: false,
                        message: "relay unavailable".to_string(),
                    };
                }
                relay.published.push(event.clone());
                let (ok, message) = match relay.store(event) {
                    Stored::New => {
                        for sub in subscribers.iter() {
                            sub.offer(event);
                        }
                        (true, String::new())
                    }
                    Stored::Duplicate => (true, "duplicate: already have this event".to_string()),
                    Stored::Stale => (false, "duplicate: have a newer event".to_string()),
                };
                RelayOutcome {
                    url: relay.url.clone(),
                    ok,
                    message,
                }
            })
            .collect();

        PublishReport {
            event_id: event.id.to_hex(),
            outcomes,
        }
    }

    async fn query(&self, filter: &RelayFilter, _timeout: Duration) -> WireResult<Vec<Event>> {
        let state = self.lock();
        if state.disconnected {
            return Err(WireError::Relay {
                url: "memory".to_string(),
                reason: "pool disconnected".to_string(),
            });
        }
        let mut results = Vec::new();
        for relay in state.relays.iter().filter(|r| !r.failing) {
            let mut matched: Vec<&Event> =
                relay.events.iter().filter(|e| filter.matches(e)).collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                matched.truncate(limit);
            }
            results.extend(matched.into_iter().cloned());
        }
        Ok(results)
    }

    async fn subscribe(&self, filter: RelayFilter) -> WireResult<Subscription> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(WireError::Relay {
                url: "memory".to_string(),
                reason: "pool disconnected".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (close_tx, close_rx) = watch::channel(false);
        let subscriber = Subscriber {
            filter,
            tx,
            closed: close_rx,
        };

        // Stored events first, as a relay answers a REQ.
        for relay in state.relays.iter().filter(|r| !r.failing) {
            for event in &relay.events {
                subscriber.offer(event);
            }
        }
        state.subscribers.push(subscriber);

        let id = format!("mem-{}", uuid::Uuid::new_v4().simple());
        Ok(Subscription::new(id, rx, close_tx))
    }

    fn relay_status(&self) -> Vec<RelayStatus> {
        let state = self.lock();
        state
            .relays
            .iter()
            .map(|r| RelayStatus {
                url: r.url.clone(),
                connected: !r.failing && !state.disconnected,
            })
            .collect()
    }

    async fn disconnect(&self) {
        let mut state = self.lock();
        state.disconnected = true;
        state.subscribers.clear();
    }
}

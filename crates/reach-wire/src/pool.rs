//! The relay transport seam.

use crate::error::WireResult;
use crate::filter::RelayFilter;
use async_trait::async_trait;
use nostr::Event;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Outcome of one publish attempt against one relay.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelayOutcome {
    pub url: String,
    pub ok: bool,
    /// Relay message or local error text.
    pub message: String,
}

/// Settled result of publishing one event to every relay.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub event_id: String,
    pub outcomes: Vec<RelayOutcome>,
}

impl PublishReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.ok).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &RelayOutcome> {
        self.outcomes.iter().filter(|o| !o.ok)
    }

    pub fn any_accepted(&self) -> bool {
        self.accepted() > 0
    }
}

/// Connection state of a single relay.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelayStatus {
    pub url: String,
    pub connected: bool,
}

/// A live event stream merged from every relay.
///
/// Dropping the subscription closes it.
pub struct Subscription {
    id: String,
    events: mpsc::Receiver<Event>,
    shutdown: watch::Sender<bool>,
}

impl Subscription {
    pub fn new(id: String, events: mpsc::Receiver<Event>, shutdown: watch::Sender<bool>) -> Self {
        Self {
            id,
            events,
            shutdown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once every relay task has stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stop all relay tasks feeding this subscription.
    pub fn close(&mut self) {
        let _ = self.shutdown.send(true);
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// A set of relays that events are published to and read from.
///
/// Implementations must never let one slow or unreachable relay hold up
/// the others.
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Relay URLs in this pool.
    fn relays(&self) -> Vec<String>;

    /// Publish to every relay concurrently and wait for all attempts to settle.
    async fn publish(&self, event: &Event) -> PublishReport;

    /// One-shot query against every relay. Results are unioned, duplicates kept.
    async fn query(&self, filter: &RelayFilter, timeout: Duration) -> WireResult<Vec<Event>>;

    /// Open a live subscription across every relay.
    async fn subscribe(&self, filter: RelayFilter) -> WireResult<Subscription>;

    /// Current connection state per relay.
    fn relay_status(&self) -> Vec<RelayStatus>;

    /// Close every connection and subscription.
    async fn disconnect(&self);
}

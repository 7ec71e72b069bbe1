//! NIP-01 relay pool over websockets.
//!
//! Publishes and queries use a short-lived connection per relay. Live
//! subscriptions run one task per relay that reconnects with exponential
//! backoff. Every inbound event is id/signature verified before it is
//! handed on.

use crate::error::{WireError, WireResult};
use crate::filter::RelayFilter;
use crate::pool::{PublishReport, RelayOutcome, RelayPool, RelayStatus, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use nostr::Event;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const SUBSCRIPTION_BUFFER: usize = 1024;

/// A message received from a relay.
#[derive(Debug)]
pub(crate) enum RelayMessage {
    Event { sub_id: String, event: Box<Event> },
    Eose { sub_id: String },
    Ok { event_id: String, accepted: bool, message: String },
    Notice(String),
    Closed { sub_id: String, message: String },
}

/// Parse a relay frame. Unknown or malformed frames yield `None`.
pub(crate) fn parse_relay_message(text: &str) -> Option<RelayMessage> {
    let value: Value = serde_json::from_str(text).ok()?;
    let arr = value.as_array()?;
    let str_at = |i: usize| arr.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
    match arr.first()?.as_str()? {
        "EVENT" => {
            let event: Event = serde_json::from_value(arr.get(2)?.clone()).ok()?;
            Some(RelayMessage::Event {
                sub_id: str_at(1),
                event: Box::new(event),
            })
        }
        "EOSE" => Some(RelayMessage::Eose { sub_id: str_at(1) }),
        "OK" => Some(RelayMessage::Ok {
            event_id: str_at(1),
            accepted: arr.get(2).and_then(Value::as_bool).unwrap_or(false),
            message: str_at(3),
        }),
        "NOTICE" => Some(RelayMessage::Notice(str_at(1))),
        "CLOSED" => Some(RelayMessage::Closed {
            sub_id: str_at(1),
            message: str_at(2),
        }),
        _ => None,
    }
}

fn req_frame(sub_id: &str, filter: &RelayFilter) -> String {
    json!(["REQ", sub_id, filter.to_json()]).to_string()
}

fn close_frame(sub_id: &str) -> String {
    json!(["CLOSE", sub_id]).to_string()
}

fn new_sub_id() -> String {
    format!("reach-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

fn verified(event: Box<Event>, relay_url: &str) -> Option<Event> {
    match event.verify() {
        Ok(()) => Some(*event),
        Err(e) => {
            warn!(relay = %relay_url, error = %e, "Dropping event with invalid id or signature");
            None
        }
    }
}

/// Relay pool speaking NIP-01 JSON over websockets.
pub struct WsRelayPool {
    relays: Vec<String>,
    publish_timeout: Duration,
    status: Arc<DashMap<String, bool>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WsRelayPool {
    /// Create a pool. Invalid relay URLs are skipped with a warning.
    pub fn new(relays: Vec<String>, publish_timeout: Duration) -> WireResult<Self> {
        let relays: Vec<String> = relays
            .into_iter()
            .filter(|u| match url::Url::parse(u) {
                Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => true,
                _ => {
                    warn!(relay = %u, "Ignoring invalid relay URL");
                    false
                }
            })
            .collect();
        if relays.is_empty() {
            return Err(WireError::NoRelays);
        }

        let status = Arc::new(DashMap::new());
        for url in &relays {
            status.insert(url.clone(), false);
        }
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            relays,
            publish_timeout,
            status,
            shutdown_tx,
        })
    }

    fn mark(&self, url: &str, connected: bool) {
        self.status.insert(url.to_string(), connected);
    }

    async fn publish_one(&self, url: &str, frame: &str, event_id: &str) -> RelayOutcome {
        let attempt = async {
            let (ws, _) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| format!("connect failed: {e}"))?;
            self.mark(url, true);
            let (mut write, mut read) = ws.split();
            write
                .send(Message::Text(frame.to_string()))
                .await
                .map_err(|e| format!("send failed: {e}"))?;

            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(format!("read failed: {e}")),
                };
                match parse_relay_message(&text) {
                    Some(RelayMessage::Ok {
                        event_id: id,
                        accepted,
                        message,
                    }) if id == event_id => {
                        let _ = write.close().await;
                        return if accepted { Ok(message) } else { Err(message) };
                    }
                    Some(RelayMessage::Notice(notice)) => {
                        debug!(relay = %url, %notice, "Relay notice");
                    }
                    _ => {}
                }
            }
            Err::<String, String>("connection closed before OK".to_string())
        };

        match tokio::time::timeout(self.publish_timeout, attempt).await {
            Ok(Ok(message)) => RelayOutcome {
                url: url.to_string(),
                ok: true,
                message,
            },
            Ok(Err(message)) => {
                if message.starts_with("connect failed") {
                    self.mark(url, false);
                }
                RelayOutcome {
                    url: url.to_string(),
                    ok: false,
                    message,
                }
            }
            Err(_) => RelayOutcome {
                url: url.to_string(),
                ok: false,
                message: format!("timed out after {:?}", self.publish_timeout),
            },
        }
    }

    async fn query_one(&self, url: &str, filter: &RelayFilter, deadline: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        let ws = match tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(url)).await
        {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                self.mark(url, false);
                warn!(relay = %url, error = %e, "Query connect failed");
                return events;
            }
            Err(_) => {
                warn!(relay = %url, "Query connect timed out");
                return events;
            }
        };
        self.mark(url, true);

        let sub_id = new_sub_id();
        let (mut write, mut read) = ws.split();
        if let Err(e) = write.send(Message::Text(req_frame(&sub_id, filter))).await {
            warn!(relay = %url, error = %e, "Failed to send REQ");
            return events;
        }

        loop {
            let msg = match tokio::time::timeout_at(deadline, read.next()).await {
                Ok(Some(Ok(m))) => m,
                Ok(Some(Err(e))) => {
                    warn!(relay = %url, error = %e, "Query read failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(relay = %url, received = events.len(), "Query timed out before EOSE");
                    break;
                }
            };
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            match parse_relay_message(&text) {
                Some(RelayMessage::Event { sub_id: s, event }) if s == sub_id => {
                    if let Some(event) = verified(event, url) {
                        events.push(event);
                    }
                }
                Some(RelayMessage::Eose { sub_id: s }) if s == sub_id => break,
                Some(RelayMessage::Closed { sub_id: s, message }) if s == sub_id => {
                    warn!(relay = %url, %message, "Relay closed query");
                    break;
                }
                _ => {}
            }
        }

        let _ = write.send(Message::Text(close_frame(&sub_id))).await;
        let _ = write.close().await;
        events
    }
}

#[async_trait]
impl RelayPool for WsRelayPool {
    fn relays(&self) -> Vec<String> {
        self.relays.clone()
    }

    async fn publish(&self, event: &Event) -> PublishReport {
        let event_id = event.id.to_hex();
        let frame = json!(["EVENT", event]).to_string();
        let attempts = self
            .relays
            .iter()
            .map(|url| self.publish_one(url, &frame, &event_id));
        let outcomes = futures::future::join_all(attempts).await;
        for outcome in outcomes.iter().filter(|o| !o.ok) {
            warn!(relay = %outcome.url, error = %outcome.message, "Publish failed");
        }
        PublishReport { event_id, outcomes }
    }

    async fn query(&self, filter: &RelayFilter, timeout: Duration) -> WireResult<Vec<Event>> {
        let deadline = Instant::now() + timeout;
        let per_relay = self
            .relays
            .iter()
            .map(|url| self.query_one(url, filter, deadline));
        let results = futures::future::join_all(per_relay).await;
        Ok(results.into_iter().flatten().collect())
    }

    async fn subscribe(&self, filter: RelayFilter) -> WireResult<Subscription> {
        let sub_id = new_sub_id();
        let (tx, rx) = mpsc::channel::<Event>(SUBSCRIPTION_BUFFER);
        let (close_tx, close_rx) = watch::channel(false);

        for relay_url in self.relays.clone() {
            let tx = tx.clone();
            let sub_id = sub_id.clone();
            let req = req_frame(&sub_id, &filter);
            let mut close_rx = close_rx.clone();
            let mut pool_shutdown_rx = self.shutdown_tx.subscribe();
            let status = Arc::clone(&self.status);

            tokio::spawn(async move {
                let mut backoff = INITIAL_BACKOFF;

                loop {
                    if *close_rx.borrow() || *pool_shutdown_rx.borrow() {
                        break;
                    }

                    let connect = tokio_tungstenite::connect_async(relay_url.as_str());
                    let Some(connected) =
                        unless_closed(connect, &mut close_rx, &mut pool_shutdown_rx).await
                    else {
                        break;
                    };
                    let ws_stream = match connected {
                        Ok((stream, _resp)) => stream,
                        Err(e) => {
                            status.insert(relay_url.clone(), false);
                            warn!(relay = %relay_url, error = %e, ?backoff, "Relay connection failed, retrying");
                            let wait = tokio::time::sleep(backoff);
                            if unless_closed(wait, &mut close_rx, &mut pool_shutdown_rx)
                                .await
                                .is_none()
                            {
                                break;
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            continue;
                        }
                    };

                    info!(relay = %relay_url, sub = %sub_id, "Subscribed");
                    status.insert(relay_url.clone(), true);
                    backoff = INITIAL_BACKOFF;

                    let (mut write, mut read) = ws_stream.split();
                    if write.send(Message::Text(req.clone())).await.is_err() {
                        warn!(relay = %relay_url, "Failed to send REQ");
                        let wait = tokio::time::sleep(backoff);
                        if unless_closed(wait, &mut close_rx, &mut pool_shutdown_rx)
                            .await
                            .is_none()
                        {
                            break;
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }

                    let should_reconnect = loop {
                        let msg = tokio::select! {
                            _ = close_rx.changed() => {
                                let _ = write.send(Message::Text(close_frame(&sub_id))).await;
                                let _ = write.close().await;
                                break false;
                            }
                            _ = pool_shutdown_rx.changed() => {
                                let _ = write.close().await;
                                break false;
                            }
                            msg = read.next() => msg,
                        };

                        let text = match msg {
                            Some(Ok(Message::Text(t))) => t,
                            Some(Ok(Message::Close(_))) | None => {
                                info!(relay = %relay_url, "Relay stream ended");
                                break true;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!(relay = %relay_url, error = %e, "Relay read error");
                                break true;
                            }
                        };

                        match parse_relay_message(&text) {
                            Some(RelayMessage::Event { sub_id: s, event }) if s == sub_id => {
                                if let Some(event) = verified(event, &relay_url) {
                                    if tx.send(event).await.is_err() {
                                        break false;
                                    }
                                }
                            }
                            Some(RelayMessage::Eose { .. }) => {
                                debug!(relay = %relay_url, "Stored events delivered");
                            }
                            Some(RelayMessage::Closed { message, .. }) => {
                                warn!(relay = %relay_url, %message, "Relay closed subscription");
                                break true;
                            }
                            Some(RelayMessage::Notice(notice)) => {
                                debug!(relay = %relay_url, %notice, "Relay notice");
                            }
                            _ => {}
                        }
                    };

                    status.insert(relay_url.clone(), false);
                    if !should_reconnect || *close_rx.borrow() || *pool_shutdown_rx.borrow() {
                        break;
                    }

                    warn!(relay = %relay_url, ?backoff, "Reconnecting");
                    let wait = tokio::time::sleep(backoff);
                    if unless_closed(wait, &mut close_rx, &mut pool_shutdown_rx)
                        .await
                        .is_none()
                    {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }

                debug!(relay = %relay_url, "Subscription loop stopped");
            });
        }

        Ok(Subscription::new(sub_id, rx, close_tx))
    }

    fn relay_status(&self) -> Vec<RelayStatus> {
        self.relays
            .iter()
            .map(|url| RelayStatus {
                url: url.clone(),
                connected: self.status.get(url).map(|c| *c).unwrap_or(false),
            })
            .collect()
    }

    async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        for mut entry in self.status.iter_mut() {
            *entry.value_mut() = false;
        }
        info!(relays = self.relays.len(), "Disconnected from relays");
    }
}

/// Drive `fut` until it finishes or either close signal fires.
///
/// Returns `None` when the subscription or the whole pool was closed first.
async fn unless_closed<F: std::future::Future>(
    fut: F,
    close_rx: &mut watch::Receiver<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<F::Output> {
    tokio::select! {
        out = fut => Some(out),
        _ = close_rx.changed() => None,
        _ = shutdown_rx.changed() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use reach_types::{Identity, Status};

    #[test]
    fn test_invalid_urls_skipped() {
        let pool = WsRelayPool::new(
            vec![
                "wss://relay.damus.io".to_string(),
                "https://not-a-relay".to_string(),
                "garbage".to_string(),
            ],
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(pool.relays(), vec!["wss://relay.damus.io".to_string()]);
        assert!(!pool.relay_status()[0].connected);
    }

    #[test]
    fn test_no_valid_relays() {
        assert!(matches!(
            WsRelayPool::new(vec!["nope".to_string()], Duration::from_secs(1)),
            Err(WireError::NoRelays)
        ));
    }

    #[test]
    fn test_parse_relay_frames() {
        let identity = Identity::generate();
        let event = codec::build_heartbeat(&identity, "x-v1", Status::Available).unwrap();
        let frame = json!(["EVENT", "sub1", event]).to_string();
        match parse_relay_message(&frame) {
            Some(RelayMessage::Event { sub_id, event: parsed }) => {
                assert_eq!(sub_id, "sub1");
                assert_eq!(parsed.id, event.id);
                assert!(verified(parsed, "wss://x").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            parse_relay_message(r#"["OK","abc",true,""]"#),
            Some(RelayMessage::Ok { accepted: true, .. })
        ));
        assert!(matches!(
            parse_relay_message(r#"["EOSE","sub1"]"#),
            Some(RelayMessage::Eose { .. })
        ));
        assert!(matches!(
            parse_relay_message(r#"["NOTICE","slow down"]"#),
            Some(RelayMessage::Notice(_))
        ));
        assert!(parse_relay_message(r#"["AUTH","challenge"]"#).is_none());
        assert!(parse_relay_message("not json").is_none());
    }

    #[test]
    fn test_tampered_event_rejected() {
        let identity = Identity::generate();
        let event = codec::build_heartbeat(&identity, "x-v1", Status::Available).unwrap();
        let mut value = serde_json::to_value(&event).unwrap();
        value["content"] = json!("tampered");
        let tampered: Event = serde_json::from_value(value).unwrap();
        assert!(verified(Box::new(tampered), "wss://x").is_none());
    }

    #[test]
    fn test_req_frame_shape() {
        let frame = req_frame("s1", &RelayFilter::new().kind(4).tag('p', "ab"));
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed[0], "REQ");
        assert_eq!(parsed[1], "s1");
        assert_eq!(parsed[2]["#p"], json!(["ab"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_ends_on_close() {
        let (close_tx, mut close_rx) = watch::channel(false);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let started = Instant::now();

        let waiter = tokio::spawn(async move {
            let wait = tokio::time::sleep(MAX_BACKOFF);
            unless_closed(wait, &mut close_rx, &mut shutdown_rx).await
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        close_tx.send(true).unwrap();

        assert!(waiter.await.unwrap().is_none());
        assert!(started.elapsed() < MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_disconnect_interrupts_pending_work() {
        let (_close_tx, mut close_rx) = watch::channel(false);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        let never = futures::future::pending::<()>();
        assert!(unless_closed(never, &mut close_rx, &mut shutdown_rx)
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_finishing_first_is_returned() {
        let (_close_tx, mut close_rx) = watch::channel(false);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let done = async { 7 };
        assert_eq!(
            unless_closed(done, &mut close_rx, &mut shutdown_rx).await,
            Some(7)
        );
    }
}

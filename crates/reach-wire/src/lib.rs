//! agent-reach wire layer.
//!
//! Turns the protocol's structured records into signed Nostr events and
//! back, and moves those events across a set of relays.
//!
//! ## Architecture
//!
//! - **codec**: canonical tag layout for service cards, heartbeats and DMs
//! - **RelayFilter**: the NIP-01 filter subset used for queries and subscriptions
//! - **RelayPool**: transport seam; `WsRelayPool` speaks NIP-01 over websockets,
//!   `InMemoryRelayPool` keeps everything in-process

pub mod codec;
pub mod error;
pub mod filter;
pub mod memory;
pub mod pool;
pub mod websocket;

pub use error::{WireError, WireResult};
pub use filter::RelayFilter;
pub use memory::InMemoryRelayPool;
pub use pool::{PublishReport, RelayOutcome, RelayPool, RelayStatus, Subscription};
pub use websocket::WsRelayPool;

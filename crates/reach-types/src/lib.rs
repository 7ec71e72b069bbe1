//! Core types for the agent-reach presence and discovery protocol.
//!
//! This crate defines the data shared by the codec, the state store and the
//! kernel: the agent identity, service cards, heartbeats, the merged agent
//! view and the configuration schema. It contains no I/O.

pub mod agent;
pub mod card;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;

pub use agent::{is_online, Agent, LIVENESS_WINDOW_SECS};
pub use card::{CardBody, Capability, LocalCardState, Protocol, ServiceCard};
pub use error::{ReachError, ReachResult};
pub use heartbeat::{Heartbeat, Status};
pub use config::ReachConfig;
pub use identity::Identity;

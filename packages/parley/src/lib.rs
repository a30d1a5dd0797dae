//! Realtime protocol client and multi-agent session orchestrator.
//!
//! One shared duplex connection, one push stream per agent session, and a
//! single event bus the presentation layer subscribes to.

pub mod agents;
pub mod backend;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod stream;

#[cfg(test)]
mod test_helpers;

pub use agents::{Agent, AgentSnapshot, AgentType, Orchestrator, RestrictionPolicy, Session};
pub use client::RealtimeClient;
pub use config::ClientConfig;
pub use error::{BackendError, OrchestratorError, StreamError, TransportError};
pub use events::{ClientEvent, EventBus, ProtocolEvent};

//! Agents, their sessions, and the orchestrator that owns both.

mod buffer;
mod orchestrator;
mod routing;
mod types;

pub use buffer::{BufferedEvent, DEFAULT_CAPACITY as DEFAULT_BUFFER_CAPACITY, EventBuffer, Replay};
pub use orchestrator::Orchestrator;
pub use routing::{Route, decide};
pub use types::{
    Agent, AgentSnapshot, AgentType, RestrictionPolicy, Session, SessionStatus, SessionTransport,
};

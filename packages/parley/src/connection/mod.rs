//! Connection state machine for the shared duplex connection.
//!
//! One actor task owns the transport, the retry timer and the keepalive
//! interval; every transition happens inside that task. Callers talk to it
//! through a cloneable [`ConnectionHandle`].

mod actor;
mod backoff;
mod state;
mod transport;

pub use actor::{ConnectionCommand, ConnectionHandle, spawn};
pub use backoff::Backoff;
pub use state::{ConnectTarget, ConnectionState, ConnectionStatus};
pub use transport::{
    ABNORMAL_CLOSE, Connector, NO_STATUS_CLOSE, NORMAL_CLOSE, Transport, TransportEvent,
    WsConnector, WsTransport,
};

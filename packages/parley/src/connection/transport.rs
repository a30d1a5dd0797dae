//! The physical duplex transport.
//!
//! [`Connector`] opens a [`Transport`]; the connection actor owns it until it
//! closes. The production implementation is a WebSocket client.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Clean shutdown. Never retried.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close frame without a status code.
pub const NO_STATUS_CLOSE: u16 = 1005;
/// No close frame at all (dropped socket, read error).
pub const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed { code: u16, reason: String },
}

#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next inbound frame or the close. Must be cancel-safe.
    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self, code: u16, reason: &str);
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}

/// WebSocket connector (tokio-tungstenite).
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(TransportError::from_tungstenite)?;
        debug!(url = %url, status = %response.status(), "websocket open");
        Ok(WsTransport { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Frame(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return TransportEvent::Frame(text),
                    Err(_) => warn!(len = bytes.len(), "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => TransportEvent::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => TransportEvent::Closed {
                            code: NO_STATUS_CLOSE,
                            reason: String::new(),
                        },
                    };
                }
                // Ping/pong control frames are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("close handshake failed: {}", e);
        }
    }
}

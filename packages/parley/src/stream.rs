//! Per-session push streams (server-sent events carrying envelope JSON).
//!
//! Each push-stream session gets one reader task. The task owns the open
//! stream, feeds decoded envelopes to the orchestrator in arrival order and
//! reconnects with backoff until the session ends or the cap is hit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_protocol::Envelope;

use crate::agents::Orchestrator;
use crate::connection::Backoff;
use crate::error::StreamError;
use crate::metrics::ClientMetrics;

/// Raw `data` payloads of a push stream, one envelope per item.
pub type FrameStream = BoxStream<'static, Result<String, StreamError>>;

#[async_trait]
pub trait PushStreamOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<FrameStream, StreamError>;
}

/// Server-sent event streams over reqwest.
#[derive(Debug, Clone)]
pub struct SseStreamOpener {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl SseStreamOpener {
    pub fn new(auth_token: Option<String>) -> Result<Self, StreamError> {
        // No overall timeout: the stream stays open for the session's lifetime.
        let client = reqwest::Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StreamError::Open(e.to_string()))?;
        Ok(Self { client, auth_token })
    }
}

#[async_trait]
impl PushStreamOpener for SseStreamOpener {
    async fn open(&self, url: &str) -> Result<FrameStream, StreamError> {
        let mut req = self.client.get(url).header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| StreamError::Open(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StreamError::Open(format!("server returned {status}")));
        }

        let frames = resp
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => Some(Ok(event.data)),
                    Err(e) => Some(Err(StreamError::Read(e.to_string()))),
                }
            });
        Ok(frames.boxed())
    }
}

/// Owner's handle on a running reader task.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    ended_normally: Arc<AtomicBool>,
}

impl StreamHandle {
    /// Stop the reader for good. It will not reconnect.
    pub fn end(&self) {
        self.ended_normally.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

pub(crate) struct StreamReader {
    pub opener: Arc<dyn PushStreamOpener>,
    pub url: String,
    pub agent_id: String,
    pub session_id: String,
    pub backoff: Backoff,
    pub orchestrator: Orchestrator,
    pub metrics: Arc<ClientMetrics>,
}

impl StreamReader {
    pub(crate) fn spawn(self) -> StreamHandle {
        let cancel = CancellationToken::new();
        let ended_normally = Arc::new(AtomicBool::new(false));
        let handle = StreamHandle {
            cancel: cancel.clone(),
            ended_normally: ended_normally.clone(),
        };
        tokio::spawn(self.run(cancel, ended_normally));
        handle
    }

    async fn run(self, cancel: CancellationToken, ended_normally: Arc<AtomicBool>) {
        let mut attempt = 0;

        loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => break,
                opened = self.opener.open(&self.url) => opened,
            };

            match opened {
                Ok(mut frames) => {
                    debug!(agent_id = %self.agent_id, session_id = %self.session_id, "push stream open");
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => break,
                            next = frames.next() => next,
                        };
                        match next {
                            Some(Ok(frame)) => {
                                attempt = 0;
                                self.on_frame(&frame).await;
                            }
                            Some(Err(e)) => {
                                warn!(agent_id = %self.agent_id, code = e.error_code(), "push stream error: {}", e);
                                break;
                            }
                            None => {
                                debug!(agent_id = %self.agent_id, "push stream ended by server");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(agent_id = %self.agent_id, code = e.error_code(), "{}", e);
                }
            }

            if ended_normally.load(Ordering::Acquire) || cancel.is_cancelled() {
                break;
            }

            match self.backoff.next_attempt(attempt) {
                Some((next, delay)) => {
                    attempt = next;
                    self.metrics.stream_reconnect();
                    info!(
                        agent_id = %self.agent_id,
                        attempt = next,
                        delay_ms = delay.as_millis() as u64,
                        "reopening push stream"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    warn!(agent_id = %self.agent_id, attempts = attempt, "push stream lost");
                    self.orchestrator
                        .stream_lost(&self.agent_id, &self.session_id)
                        .await;
                    break;
                }
            }
        }

        debug!(agent_id = %self.agent_id, session_id = %self.session_id, "push stream reader stopped");
    }

    async fn on_frame(&self, frame: &str) {
        self.metrics.frame_received();
        match Envelope::decode(frame) {
            Ok(envelope) => {
                self.orchestrator
                    .ingest(&self.agent_id, &self.session_id, envelope)
                    .await
            }
            Err(e) => {
                self.metrics.decode_error();
                warn!(agent_id = %self.agent_id, code = e.error_code(), "discarding frame: {}", e);
            }
        }
    }
}

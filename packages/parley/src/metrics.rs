//! Client metrics
//!
//! Counters for frames, reconnects and event routing. Read through
//! [`ClientMetrics::snapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct ClientMetrics {
    // Frame metrics
    /// Frames received on the duplex connection or a push stream
    pub frames_received: AtomicU64,
    /// Frames written to the duplex connection
    pub frames_sent: AtomicU64,
    /// Frames discarded because they did not decode
    pub decode_errors: AtomicU64,

    // Connection metrics
    pub reconnect_attempts: AtomicU64,
    pub stream_reconnects: AtomicU64,

    // Event metrics
    pub events_published: AtomicU64,
    pub events_buffered: AtomicU64,
    pub events_replayed: AtomicU64,
    /// Buffered events evicted by the drop-oldest policy
    pub events_dropped: AtomicU64,
    pub events_unhandled: AtomicU64,

    start_time: Option<Instant>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_reconnect(&self) {
        self.stream_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_buffered(&self) {
        self.events_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_replayed(&self, count: u64) {
        self.events_replayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_unhandled(&self) {
        self.events_unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                sent: self.frames_sent.load(Ordering::Relaxed),
                decode_errors: self.decode_errors.load(Ordering::Relaxed),
            },
            connection: ConnectionMetrics {
                reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
                stream_reconnects: self.stream_reconnects.load(Ordering::Relaxed),
            },
            events: EventMetrics {
                published: self.events_published.load(Ordering::Relaxed),
                buffered: self.events_buffered.load(Ordering::Relaxed),
                replayed: self.events_replayed.load(Ordering::Relaxed),
                dropped: self.events_dropped.load(Ordering::Relaxed),
                unhandled: self.events_unhandled.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub frames: FrameMetrics,
    pub connection: ConnectionMetrics,
    pub events: EventMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub sent: u64,
    pub decode_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub reconnect_attempts: u64,
    pub stream_reconnects: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetrics {
    pub published: u64,
    pub buffered: u64,
    pub replayed: u64,
    pub dropped: u64,
    pub unhandled: u64,
}

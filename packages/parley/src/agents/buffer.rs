//! Bounded per-agent buffer of events that arrived while the agent was in the
//! background.
//!
//! FIFO with drop-oldest on overflow. The orchestrator removes the whole
//! buffer from its registry before replaying, so a replay always drains it
//! completely and nothing can be replayed twice.

use std::collections::VecDeque;
use std::time::Instant;

use parley_protocol::Envelope;

/// Default maximum number of buffered events per agent.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub envelope: Envelope,
    pub enqueued_at: Instant,
}

#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<BufferedEvent>,
    capacity: usize,
    dropped: u64,
}

/// Everything a buffer held, in arrival order.
#[derive(Debug)]
pub struct Replay {
    pub events: Vec<BufferedEvent>,
    pub dropped: u64,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Append an event. Returns `true` when the oldest event was evicted.
    pub fn push(&mut self, envelope: Envelope) -> bool {
        let mut evicted = false;
        while self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
            evicted = true;
        }
        self.events.push_back(BufferedEvent {
            envelope,
            enqueued_at: Instant::now(),
        });
        evicted
    }

    /// Consume the buffer.
    pub fn into_replay(self) -> Replay {
        Replay {
            events: self.events.into(),
            dropped: self.dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events evicted since the buffer was opened.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

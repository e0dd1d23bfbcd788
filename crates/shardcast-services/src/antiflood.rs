//! Antiflood: token bucket rate limiting per requesting peer.
//!
//! Two buckets per peer:
//!   message: every inbound message costs 1 token
//!   topic:   every (peer, topic) pair costs 1 token per message
//!
//! Empty bucket = reject. Buckets refill continuously.
//!
//! A bucket back at full capacity and untouched for `IDLE_AFTER` carries no
//! state worth keeping. Such buckets are swept every `SWEEP_EVERY`
//! admission checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use shardcast_core::wire::InboundMessage;
use shardcast_core::PeerId;

use crate::error::AdmissionError;
use crate::interfaces::AntifloodHandler;

const MESSAGE_RATE: f64 = 64.0;
const MESSAGE_BURST: f64 = 32.0;
const TOPIC_RATE: f64 = 16.0;
const TOPIC_BURST: f64 = 8.0;

const IDLE_AFTER: Duration = Duration::from_secs(60);
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Returns true if `cost` tokens were available and taken.
    pub fn allow(&mut self, cost: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens.min(self.capacity)
    }

    /// Untouched for at least `idle` and refilled to capacity by `now`.
    pub fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        elapsed >= idle
            && self.tokens + elapsed.as_secs_f64() * self.refill_rate >= self.capacity
    }
}

/// Per-peer token-bucket flood guard.
pub struct PeerFloodGuard {
    messages: DashMap<PeerId, TokenBucket>,
    topics: DashMap<(PeerId, String), TokenBucket>,
    message_limits: (f64, f64),
    topic_limits: (f64, f64),
    checks: AtomicU64,
}

impl Default for PeerFloodGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerFloodGuard {
    pub fn new() -> Self {
        Self::with_limits((MESSAGE_BURST, MESSAGE_RATE), (TOPIC_BURST, TOPIC_RATE))
    }

    /// Limits are `(burst, rate per second)`.
    pub fn with_limits(message_limits: (f64, f64), topic_limits: (f64, f64)) -> Self {
        Self {
            messages: DashMap::new(),
            topics: DashMap::new(),
            message_limits,
            topic_limits,
            checks: AtomicU64::new(0),
        }
    }

    /// Forget buckets idle for at least `idle`. Returns how many went.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.messages.len() + self.topics.len();
        self.messages.retain(|_, bucket| !bucket.is_idle(now, idle));
        self.topics.retain(|_, bucket| !bucket.is_idle(now, idle));
        let swept = before.saturating_sub(self.messages.len() + self.topics.len());
        if swept > 0 {
            tracing::debug!(swept, "idle flood buckets swept");
        }
        swept
    }

    /// Peers and (peer, topic) pairs currently tracked.
    pub fn tracked(&self) -> (usize, usize) {
        (self.messages.len(), self.topics.len())
    }

    fn count_check(&self) {
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_idle(IDLE_AFTER);
        }
    }
}

impl AntifloodHandler for PeerFloodGuard {
    fn can_process_message(
        &self,
        _message: &InboundMessage,
        from: &PeerId,
    ) -> Result<(), AdmissionError> {
        let (burst, rate) = self.message_limits;
        let allowed = self
            .messages
            .entry(from.clone())
            .or_insert_with(|| TokenBucket::new(burst, rate))
            .allow(1.0);
        self.count_check();

        if allowed {
            Ok(())
        } else {
            tracing::debug!(peer = %from, "message rejected, peer flooding");
            Err(AdmissionError::Flooded { peer: from.clone() })
        }
    }

    fn can_process_messages_on_topic(
        &self,
        peer: &PeerId,
        topic: &str,
        num_messages: u32,
        _total_size: u64,
        _seq_no: u64,
    ) -> Result<(), AdmissionError> {
        let (burst, rate) = self.topic_limits;
        let allowed = self
            .topics
            .entry((peer.clone(), topic.to_string()))
            .or_insert_with(|| TokenBucket::new(burst, rate))
            .allow(f64::from(num_messages));
        self.count_check();

        if allowed {
            Ok(())
        } else {
            tracing::debug!(peer = %peer, topic, "message rejected, topic flooded");
            Err(AdmissionError::TopicFlooded {
                peer: peer.clone(),
                topic: topic.to_string(),
            })
        }
    }
}

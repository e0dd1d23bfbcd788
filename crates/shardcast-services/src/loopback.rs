//! In-process transport: every node is an inbox on a shared bus.
//!
//! Topic publishes fan out to every other subscriber of the topic; direct
//! sends go to one inbox. Delivery is unbounded and never blocks, so the
//! blocking messenger call returns as soon as the payload is queued.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use shardcast_core::wire::InboundMessage;
use shardcast_core::PeerId;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::interfaces::{Messenger, RequestSender};

/// What lands in a node's inbox.
#[derive(Debug, Clone)]
pub enum Delivery {
    Topic(InboundMessage),
    Direct { from: PeerId, payload: Bytes },
}

#[derive(Default)]
struct Bus {
    inboxes: DashMap<PeerId, mpsc::UnboundedSender<Delivery>>,
    subscriptions: DashMap<String, BTreeSet<PeerId>>,
    seq_no: AtomicU64,
}

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    bus: Arc<Bus>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Joining again under the same id replaces the old inbox.
    pub fn join(&self, pid: PeerId) -> (LoopbackNode, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bus.inboxes.insert(pid.clone(), tx);
        tracing::debug!(peer = %pid, "node joined loopback network");

        let node = LoopbackNode {
            network: self.clone(),
            pid,
            request_topic: String::new(),
            closed: AtomicBool::new(false),
        };
        (node, rx)
    }

    /// Detach a node. Its inbox receiver sees the end of the stream once
    /// drained.
    pub fn leave(&self, pid: &PeerId) {
        self.bus.inboxes.remove(pid);
        for mut subscribers in self.bus.subscriptions.iter_mut() {
            subscribers.remove(pid);
        }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.bus.inboxes.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    fn subscribe(&self, pid: &PeerId, topic: &str) {
        self.bus
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(pid.clone());
    }

    fn publish(&self, from: &PeerId, topic: &str, payload: Bytes) -> Result<usize, TransportError> {
        let subscribers: Vec<PeerId> = match self.bus.subscriptions.get(topic) {
            Some(subscribers) => subscribers.iter().filter(|p| *p != from).cloned().collect(),
            None => return Err(TransportError::TopicNotFound(topic.to_string())),
        };

        let message = InboundMessage {
            data: payload,
            peer: from.clone(),
            topic: topic.to_string(),
            seq_no: self.bus.seq_no.fetch_add(1, Ordering::Relaxed),
        };

        let mut delivered = 0;
        for pid in subscribers {
            if let Some(inbox) = self.bus.inboxes.get(&pid) {
                if inbox.send(Delivery::Topic(message.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        tracing::trace!(topic, delivered, "published on loopback");
        Ok(delivered)
    }

    fn send_direct(&self, from: &PeerId, to: &PeerId, payload: Bytes) -> Result<(), TransportError> {
        let inbox = self
            .bus
            .inboxes
            .get(to)
            .ok_or_else(|| TransportError::PeerNotFound(to.clone()))?;
        inbox
            .send(Delivery::Direct {
                from: from.clone(),
                payload,
            })
            .map_err(|_| TransportError::PeerNotFound(to.clone()))
    }
}

/// One node's handle on the loopback network.
pub struct LoopbackNode {
    network: LoopbackNetwork,
    pid: PeerId,
    request_topic: String,
    closed: AtomicBool,
}

impl LoopbackNode {
    pub fn peer_id(&self) -> &PeerId {
        &self.pid
    }

    /// Topic `send_on_request_topic` publishes on. Also subscribes the node
    /// to it, so it can serve requests from its peers.
    pub fn with_request_topic(mut self, topic: impl Into<String>) -> Self {
        self.request_topic = topic.into();
        self.network.subscribe(&self.pid, &self.request_topic);
        self
    }

    pub fn subscribe(&self, topic: &str) {
        self.network.subscribe(&self.pid, topic);
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl RequestSender for LoopbackNode {
    fn request_topic(&self) -> String {
        self.request_topic.clone()
    }

    fn send_on_request_topic(
        &self,
        payload: Bytes,
        original_keys: &[Bytes],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        tracing::trace!(topic = %self.request_topic, keys = original_keys.len(), "sending request");
        self.network
            .publish(&self.pid, &self.request_topic, payload)
            .map(|_| ())
    }

    fn send_direct(&self, payload: Bytes, peer: &PeerId) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.network.send_direct(&self.pid, peer, payload)
    }
}

impl Messenger for LoopbackNode {
    fn broadcast_on_channel_blocking(
        &self,
        pipe: &str,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        tracing::trace!(pipe, topic, size = payload.len(), "loopback broadcast");
        self.network.publish(&self.pid, topic, payload).map(|_| ())
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.leave(&self.pid);
            tracing::debug!(peer = %self.pid, "node left loopback network");
        }
        Ok(())
    }
}

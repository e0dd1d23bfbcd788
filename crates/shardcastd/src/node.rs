//! One simulated node: a resolver and a broadcaster over a loopback handle,
//! plus the task that drains the node's inbox.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::DashSet;
use tokio::sync::{broadcast, mpsc};

use shardcast_core::config::ShardcastConfig;
use shardcast_core::wire::{
    InboundMessage, PEER_AUTHENTICATION_TOPIC, REQUEST_TOPIC_SUFFIX, TRANSACTION_TOPIC,
};
use shardcast_core::{Batch, MultiShardCoordinator, PeerId, ShardCoordinator};
use shardcast_services::{
    BroadcasterArgs, ChunkedResolver, CountingThrottler, Delivery, JsonMarshaller, LoopbackNetwork,
    PeerFloodGuard, ResolverArgs, TransactionBroadcaster,
};

use crate::membership::{StaticMembership, Validator};

/// Epoch the simulated nodes sync validator records for.
pub const SYNC_EPOCH: u32 = 0;

pub struct Node {
    pub pid: PeerId,
    pub resolver: Arc<ChunkedResolver>,
    pub broadcaster: TransactionBroadcaster,
    /// Chunk indexes already asked for.
    requested_chunks: DashSet<u32>,
}

impl Node {
    /// Join `network` as `validator` and subscribe to the request topic and to
    /// every transaction topic touching the validator's shard.
    pub fn start(
        config: &ShardcastConfig,
        network: &LoopbackNetwork,
        membership: Arc<StaticMembership>,
        validator: &Validator,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Delivery>)> {
        let coordinator = Arc::new(
            MultiShardCoordinator::new(config.node.num_shards, validator.shard)
                .context("invalid shard layout")?,
        );

        let (handle, inbox) = network.join(validator.pid.clone());
        let request_topic = format!("{PEER_AUTHENTICATION_TOPIC}{REQUEST_TOPIC_SUFFIX}");
        let handle = Arc::new(handle.with_request_topic(request_topic));
        for shard in 0..coordinator.number_of_shards() {
            handle.subscribe(&format!(
                "{TRANSACTION_TOPIC}{}",
                coordinator.communication_identifier(shard)
            ));
        }

        let resolver = ChunkedResolver::new(ResolverArgs {
            marshaller: JsonMarshaller,
            sender: handle.clone(),
            antiflood: Arc::new(PeerFloodGuard::new()),
            throttler: Arc::new(CountingThrottler::new(config.resolver.max_in_flight)),
            record_cache: Arc::new(membership.seeded_cache()?),
            peer_shard_mapper: membership.clone(),
            nodes_coordinator: membership,
            max_records_per_response: config.resolver.max_records_per_response,
        })?;

        let b = &config.broadcaster;
        let broadcaster = TransactionBroadcaster::new(BroadcasterArgs {
            marshaller: JsonMarshaller,
            shard_coordinator: coordinator,
            messenger: handle,
            max_allowed_time: Duration::from_millis(b.max_allowed_time_ms),
            max_deviation_time: Duration::from_millis(b.max_deviation_time_ms),
            max_packet_bytes: b.max_packet_bytes,
            report_every_ticks: b.report_every_ticks,
        })?;

        tracing::info!(peer = %validator.pid, shard = validator.shard, "node started");
        let node = Arc::new(Self {
            pid: validator.pid.clone(),
            resolver: Arc::new(resolver),
            broadcaster,
            requested_chunks: DashSet::new(),
        });
        Ok((node, inbox))
    }

    /// Ask the network for one chunk of the validator records, once.
    pub fn request_chunk(&self, index: u32) {
        if !self.requested_chunks.insert(index) {
            return;
        }
        if let Err(e) = self.resolver.request_by_chunk(index, SYNC_EPOCH) {
            tracing::debug!(peer = %self.pid, chunk = index, error = %e, "chunk request failed");
        }
    }

    /// Drain the inbox until shutdown or until the node leaves the network.
    pub async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Delivery>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!(peer = %self.pid, "inbox loop stopping");
                    return;
                }
                delivery = inbox.recv() => match delivery {
                    Some(Delivery::Topic(message)) => self.on_topic_message(&message),
                    Some(Delivery::Direct { from, payload }) => self.on_direct(&from, &payload),
                    None => return,
                }
            }
        }
    }

    fn on_topic_message(&self, message: &InboundMessage) {
        if message.topic == self.resolver.topic() {
            if let Err(e) = self.resolver.process_received_message(message, &message.peer) {
                tracing::debug!(
                    peer = %self.pid,
                    from = %message.peer,
                    error = %e,
                    "request not served"
                );
            }
            return;
        }

        match serde_json::from_slice::<Batch>(&message.data) {
            Ok(batch) => tracing::debug!(
                peer = %self.pid,
                topic = %message.topic,
                from = %message.peer,
                transactions = batch.data.len(),
                "received transactions"
            ),
            Err(e) => tracing::warn!(topic = %message.topic, error = %e, "undecodable packet"),
        }
    }

    fn on_direct(&self, from: &PeerId, payload: &Bytes) {
        let batch: Batch = match serde_json::from_slice(payload) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(from = %from, error = %e, "undecodable response");
                return;
            }
        };
        tracing::info!(
            peer = %self.pid,
            from = %from,
            records = batch.data.len(),
            chunk = batch.chunk_index,
            max_chunks = batch.max_chunks,
            "received identity records"
        );

        // Chunk responses carry no reference; walk the rest of the universe.
        if batch.reference.is_none() && batch.is_chunked() {
            let next = batch.chunk_index + 1;
            if next < batch.max_chunks {
                self.request_chunk(next);
            }
        }
    }
}

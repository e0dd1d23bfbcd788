//! shardcast integration test harness.
//!
//! Tests wire real resolvers and broadcasters to each other over the
//! in-process loopback network. No sockets, no root, no external processes.
//!
//!   cargo test --test integration
//!
//! Loopback delivery is synchronous: by the time a send returns, the payload
//! sits in every recipient's inbox. Resolver tests therefore pump inboxes by
//! hand with `try_recv`; broadcaster tests wait on the inbox with a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

use shardcast_core::wire::{PEER_AUTHENTICATION_TOPIC, REQUEST_TOPIC_SUFFIX};
use shardcast_core::{Batch, PeerId, ShardId, METACHAIN_SHARD_ID};
use shardcast_services::{
    AntifloodHandler, ChunkedResolver, CountingThrottler, Delivery, JsonMarshaller,
    LoopbackNetwork, LoopbackNode, MemoryRecordCache, MembershipError, NodesCoordinator,
    PeerFloodGuard, PeerShardMapper, ResolverArgs, ResolverError,
};

mod broadcast;
mod resolver_sync;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn request_topic() -> String {
    format!("{PEER_AUTHENTICATION_TOPIC}{REQUEST_TOPIC_SUFFIX}")
}

/// Public key of validator `i`.
pub fn validator_key(i: usize) -> Bytes {
    Bytes::from(format!("vk-{i:03}"))
}

/// Identity record validator `i` gossips.
pub fn validator_record(i: usize) -> Bytes {
    Bytes::from(format!("record-{i:03}"))
}

fn validator_pid(i: usize) -> PeerId {
    PeerId::new(format!("vpid-{i:03}").into_bytes())
}

/// A fixed validator set spread over shard 0, shard 1 and the metachain.
pub struct Validators {
    count: usize,
}

impl PeerShardMapper for Validators {
    fn last_known_peer_id(&self, public_key: &[u8]) -> Option<PeerId> {
        (0..self.count)
            .find(|i| validator_key(*i).as_ref() == public_key)
            .map(validator_pid)
    }
}

impl NodesCoordinator for Validators {
    fn all_eligible_validators_keys(
        &self,
        _epoch: u32,
    ) -> Result<HashMap<ShardId, Vec<Bytes>>, MembershipError> {
        let mut by_shard: HashMap<ShardId, Vec<Bytes>> = HashMap::new();
        // Reverse order so the resolver has to sort.
        for i in (0..self.count).rev() {
            let shard = match i % 3 {
                0 => 0,
                1 => 1,
                _ => METACHAIN_SHARD_ID,
            };
            by_shard.entry(shard).or_default().push(validator_key(i));
        }
        Ok(by_shard)
    }
}

/// One resolver-bearing participant on the loopback network.
pub struct Peer {
    pub pid: PeerId,
    pub resolver: ChunkedResolver,
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

impl Peer {
    /// Serve every request waiting in the inbox and return the responses
    /// that arrived directly, with their sender.
    pub fn pump(&mut self) -> Vec<(PeerId, Batch)> {
        let mut responses = Vec::new();
        while let Ok(delivery) = self.inbox.try_recv() {
            match delivery {
                Delivery::Topic(message) => {
                    let served = self.resolver.process_received_message(&message, &message.peer);
                    if let Err(e) = served {
                        eprintln!("{} did not serve a request: {e}", self.pid);
                    }
                }
                Delivery::Direct { from, payload } => {
                    let batch: Batch =
                        serde_json::from_slice(&payload).expect("response is a Batch");
                    responses.push((from, batch));
                }
            }
        }
        responses
    }

    /// Serve the next waiting request and hand back the resolver's verdict.
    pub fn serve_one(&mut self) -> Result<(), ResolverError> {
        match self.inbox.try_recv() {
            Ok(Delivery::Topic(message)) => {
                self.resolver.process_received_message(&message, &message.peer)
            }
            other => panic!("expected a waiting request, got {other:?}"),
        }
    }
}

pub struct Cluster {
    pub network: LoopbackNetwork,
    pub peers: Vec<Peer>,
}

/// `peers` nodes, each caching the records of `validators` validators and
/// answering with at most `max_records` records per response.
pub fn cluster(peers: usize, validators: usize, max_records: usize) -> Cluster {
    cluster_with_antiflood(peers, validators, max_records, || {
        Arc::new(PeerFloodGuard::new()) as Arc<dyn AntifloodHandler>
    })
}

pub fn cluster_with_antiflood(
    peers: usize,
    validators: usize,
    max_records: usize,
    antiflood: impl Fn() -> Arc<dyn AntifloodHandler>,
) -> Cluster {
    let network = LoopbackNetwork::new();
    let set = Arc::new(Validators { count: validators });

    let cache = MemoryRecordCache::new();
    for i in 0..validators {
        cache.put(validator_pid(i).as_bytes().to_vec(), validator_record(i));
    }

    let peers = (0..peers)
        .map(|n| {
            let pid = PeerId::new(format!("node-{n}").into_bytes());
            let (handle, inbox) = network.join(pid.clone());
            let handle: Arc<LoopbackNode> = Arc::new(handle.with_request_topic(request_topic()));

            let resolver = ChunkedResolver::new(ResolverArgs {
                marshaller: JsonMarshaller,
                sender: handle,
                antiflood: antiflood(),
                throttler: Arc::new(CountingThrottler::new(8)),
                record_cache: Arc::new(cache.clone()),
                peer_shard_mapper: set.clone(),
                nodes_coordinator: set.clone(),
                max_records_per_response: max_records,
            })
            .expect("valid resolver settings");

            Peer {
                pid,
                resolver,
                inbox,
            }
        })
        .collect();

    Cluster { network, peers }
}

/// Wait for the next delivery, failing after `within`.
pub async fn next_delivery(
    inbox: &mut mpsc::UnboundedReceiver<Delivery>,
    within: Duration,
) -> Result<Delivery> {
    match tokio::time::timeout(within, inbox.recv()).await {
        Ok(Some(delivery)) => Ok(delivery),
        Ok(None) => bail!("inbox closed"),
        Err(_) => bail!("no delivery within {within:?}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Every peer of a fresh cluster is reachable on the loopback network.
#[test]
fn test_cluster_peers_joined() {
    let c = cluster(3, 0, 5);
    let pids: Vec<PeerId> = c.peers.iter().map(|p| p.pid.clone()).collect();
    assert_eq!(c.network.peers(), pids);
    assert!(c.peers.iter().all(|p| p.resolver.topic() == request_topic()));
}

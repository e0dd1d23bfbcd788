//! Static validator set for the in-process network.
//!
//! Node `i` runs shard `(first_shard + i) % num_shards`, signs with public key
//! `validator-{i:03}` and is reachable as peer `node-{i:03}`. Every epoch has
//! the same eligible set.

use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;
use shardcast_core::{PeerId, ShardId};
use shardcast_services::{MemoryRecordCache, MembershipError, NodesCoordinator, PeerShardMapper};

#[derive(Debug, Clone)]
pub struct Validator {
    pub public_key: Bytes,
    pub pid: PeerId,
    pub shard: ShardId,
}

pub struct StaticMembership {
    validators: Vec<Validator>,
    by_key: HashMap<Bytes, PeerId>,
}

/// Identity record a node gossips about itself.
#[derive(Serialize)]
struct PeerAuthentication<'a> {
    pid: String,
    public_key: String,
    shard: ShardId,
    payload: &'a str,
}

impl StaticMembership {
    pub fn new(nodes: u32, num_shards: u32, first_shard: ShardId) -> Self {
        let validators: Vec<Validator> = (0..nodes)
            .map(|i| Validator {
                public_key: Bytes::from(format!("validator-{i:03}")),
                pid: PeerId::new(format!("node-{i:03}").into_bytes()),
                shard: (first_shard + i) % num_shards,
            })
            .collect();
        let by_key = validators
            .iter()
            .map(|v| (v.public_key.clone(), v.pid.clone()))
            .collect();
        Self { validators, by_key }
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// A record cache holding every validator's identity record, as a node
    /// would have it once gossip has settled.
    pub fn seeded_cache(&self) -> serde_json::Result<MemoryRecordCache> {
        let cache = MemoryRecordCache::new();
        for v in &self.validators {
            let record = serde_json::to_vec(&PeerAuthentication {
                pid: v.pid.pretty(),
                public_key: hex::encode(&v.public_key),
                shard: v.shard,
                payload: "heartbeat",
            })?;
            cache.put(v.pid.as_bytes().to_vec(), record);
        }
        Ok(cache)
    }
}

impl PeerShardMapper for StaticMembership {
    fn last_known_peer_id(&self, public_key: &[u8]) -> Option<PeerId> {
        self.by_key.get(public_key).cloned()
    }
}

impl NodesCoordinator for StaticMembership {
    fn all_eligible_validators_keys(
        &self,
        _epoch: u32,
    ) -> Result<HashMap<ShardId, Vec<Bytes>>, MembershipError> {
        let mut by_shard: HashMap<ShardId, Vec<Bytes>> = HashMap::new();
        for v in &self.validators {
            by_shard.entry(v.shard).or_default().push(v.public_key.clone());
        }
        Ok(by_shard)
    }
}

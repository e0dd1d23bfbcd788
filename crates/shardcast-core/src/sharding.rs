//! Shard coordination: which shard owns an address, and which topic
//! two shards talk on.
//!
//! Addresses are assigned to shards by their trailing bytes. With `n`
//! shards, the low `ceil(log2(n))` bits select the shard; a value past the
//! last shard falls back to one bit fewer. This keeps assignment stable
//! when the shard count is not a power of two.

use std::fmt;

/// Shard identifier. `0..number_of_shards` plus the reserved ids below.
pub type ShardId = u32;

/// Reserved id of the metachain.
pub const METACHAIN_SHARD_ID: ShardId = u32::MAX;

/// Reserved id meaning "every shard".
pub const ALL_SHARD_ID: ShardId = 0xFFFF_FFF0;

/// Capability consumed by the broadcaster to route records.
pub trait ShardCoordinator: Send + Sync {
    fn number_of_shards(&self) -> u32;

    /// The shard owning `address`.
    fn compute_id(&self, address: &[u8]) -> ShardId;

    /// The shard this node belongs to.
    fn self_id(&self) -> ShardId;

    /// Topic suffix shared by this node's shard and `destination`.
    fn communication_identifier(&self, destination: ShardId) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShardError {
    #[error("number of shards must be greater than zero")]
    ZeroShards,
    #[error("self shard {self_id} is out of range for {num_shards} shards")]
    SelfShardOutOfRange { self_id: ShardId, num_shards: u32 },
}

/// Renders a shard id as it appears inside a topic name.
pub fn shard_id_to_string(shard_id: ShardId) -> String {
    match shard_id {
        METACHAIN_SHARD_ID => "_META".to_string(),
        ALL_SHARD_ID => "_ALL".to_string(),
        id => format!("_{id}"),
    }
}

/// Identifier for the channel between two shards. Symmetric in its arguments.
pub fn communication_identifier_between(a: ShardId, b: ShardId) -> String {
    if a == ALL_SHARD_ID || b == ALL_SHARD_ID {
        return shard_id_to_string(ALL_SHARD_ID);
    }
    if a == b {
        return shard_id_to_string(a);
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    format!("{}{}", shard_id_to_string(low), shard_id_to_string(high))
}

/// Bit-mask shard coordinator.
#[derive(Clone, PartialEq, Eq)]
pub struct MultiShardCoordinator {
    num_shards: u32,
    self_id: ShardId,
    mask_high: u32,
    mask_low: u32,
}

impl MultiShardCoordinator {
    /// `self_id` may be any shard below `num_shards` or the metachain.
    pub fn new(num_shards: u32, self_id: ShardId) -> Result<Self, ShardError> {
        if num_shards == 0 {
            return Err(ShardError::ZeroShards);
        }
        if self_id >= num_shards && self_id != METACHAIN_SHARD_ID {
            return Err(ShardError::SelfShardOutOfRange {
                self_id,
                num_shards,
            });
        }

        let (mask_high, mask_low) = masks(num_shards);
        Ok(Self {
            num_shards,
            self_id,
            mask_high,
            mask_low,
        })
    }

    fn bytes_needed(&self) -> usize {
        match self.num_shards {
            0..=0x100 => 1,
            0x101..=0x1_0000 => 2,
            0x1_0001..=0x100_0000 => 3,
            _ => 4,
        }
    }
}

/// High mask covers `ceil(log2(n))` bits, low mask one bit fewer.
fn masks(num_shards: u32) -> (u32, u32) {
    if num_shards <= 1 {
        return (0, 0);
    }
    let bits = 32 - (num_shards - 1).leading_zeros();
    let high = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    let low = (1u32 << (bits - 1)) - 1;
    (high, low)
}

impl ShardCoordinator for MultiShardCoordinator {
    fn number_of_shards(&self) -> u32 {
        self.num_shards
    }

    fn compute_id(&self, address: &[u8]) -> ShardId {
        let needed = self.bytes_needed();
        let start = address.len().saturating_sub(needed);

        let value = address[start..]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));

        let shard = value & self.mask_high;
        if shard > self.num_shards - 1 {
            value & self.mask_low
        } else {
            shard
        }
    }

    fn self_id(&self) -> ShardId {
        self.self_id
    }

    fn communication_identifier(&self, destination: ShardId) -> String {
        communication_identifier_between(self.self_id, destination)
    }
}

impl fmt::Debug for MultiShardCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiShardCoordinator")
            .field("num_shards", &self.num_shards)
            .field("self_id", &self.self_id)
            .finish()
    }
}

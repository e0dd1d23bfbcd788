//! Groups records by destination shard.

use std::collections::BTreeMap;

use shardcast_core::{ShardCoordinator, ShardId, Transaction};

/// Shard a transaction is routed to: the shard owning its sender.
pub fn sender_shard(tx: &Transaction, coordinator: &dyn ShardCoordinator) -> ShardId {
    coordinator.compute_id(&tx.sender)
}

/// Split `items` by shard. Relative order inside each shard is kept;
/// shards come out in ascending id order.
pub fn partition_by_shard<T, I, F>(items: I, shard_of: F) -> BTreeMap<ShardId, Vec<T>>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> ShardId,
{
    let mut by_shard: BTreeMap<ShardId, Vec<T>> = BTreeMap::new();
    for item in items {
        by_shard.entry(shard_of(&item)).or_default().push(item);
    }
    by_shard
}

//! shardcast-core — shared wire types, shard coordination, and configuration.
//! All other shardcast crates depend on this one.

pub mod config;
pub mod sharding;
pub mod wire;

pub use sharding::{MultiShardCoordinator, ShardCoordinator, ShardId, METACHAIN_SHARD_ID};
pub use wire::{Batch, PeerId, Request, RequestData, RequestKind, Transaction};

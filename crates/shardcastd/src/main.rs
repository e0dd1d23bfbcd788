//! shardcastd — runs a simulated multi-node shard network in one process.
//!
//! Every node serves identity-record requests through a chunked resolver and
//! broadcasts transactions through an accumulating broadcaster, all over an
//! in-process loopback transport. The first node syncs the validator records
//! chunk by chunk and produces a steady stream of synthetic transactions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use rand::Rng;
use tokio::sync::broadcast;

use shardcast_core::config::ShardcastConfig;
use shardcast_core::Transaction;
use shardcast_services::{LoopbackNetwork, OutboundItem};

mod membership;
mod node;

use membership::StaticMembership;
use node::Node;

/// Pause between two synthetic transaction batches.
const PRODUCE_INTERVAL: Duration = Duration::from_millis(100);

/// Transactions per synthetic batch.
const PRODUCE_BATCH: u64 = 32;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ShardcastConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ShardcastConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ShardcastConfig::default()
    });
    tracing::info!(
        nodes = config.node.nodes,
        num_shards = config.node.num_shards,
        max_records_per_response = config.resolver.max_records_per_response,
        "shardcastd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Nodes ────────────────────────────────────────────────────────────────
    let network = LoopbackNetwork::new();
    let membership = Arc::new(StaticMembership::new(
        config.node.nodes,
        config.node.num_shards,
        config.node.self_shard,
    ));

    let mut nodes = Vec::with_capacity(membership.validators().len());
    let mut inbox_tasks = Vec::with_capacity(membership.validators().len());
    for validator in membership.validators() {
        let (node, inbox) = Node::start(&config, &network, membership.clone(), validator)?;
        inbox_tasks.push(tokio::spawn(node.clone().run(inbox, shutdown_tx.subscribe())));
        nodes.push(node);
    }

    let Some(local) = nodes.first().cloned() else {
        anyhow::bail!("no nodes configured");
    };

    // ── Record sync ──────────────────────────────────────────────────────────
    local.request_chunk(0);
    let sample: Vec<Bytes> = membership
        .validators()
        .iter()
        .rev()
        .take(3)
        .map(|v| v.public_key.clone())
        .collect();
    if let Err(e) = local.resolver.request_by_key_set(sample) {
        tracing::warn!(error = %e, "key set request failed");
    }

    // ── Producer ─────────────────────────────────────────────────────────────
    let producer_task = {
        let local = local.clone();
        let num_shards = config.node.num_shards;
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRODUCE_INTERVAL);
            let mut nonce = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {
                        let items: Vec<OutboundItem> = (0..PRODUCE_BATCH)
                            .map(|_| {
                                nonce += 1;
                                synthetic_transaction(nonce, num_shards).into()
                            })
                            .collect();
                        if let Err(e) = local.broadcaster.push(items) {
                            tracing::warn!(error = %e, "push failed");
                        }
                    }
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = producer_task      => tracing::error!("producer exited: {:?}", r),
    }
    // Also reached when the producer died on its own.
    let _ = shutdown_tx.send(());

    for node in &nodes {
        if let Err(e) = node.broadcaster.close() {
            tracing::warn!(peer = %node.pid, error = %e, "broadcaster close failed");
        }
    }
    for task in inbox_tasks {
        let _ = task.await;
    }
    tracing::info!(
        total_sent = local.broadcaster.total_sent(),
        "shardcastd stopped"
    );
    Ok(())
}

/// A transaction from a random sender; the last address byte picks the shard.
fn synthetic_transaction(nonce: u64, num_shards: u32) -> Transaction {
    let mut rng = rand::thread_rng();
    let mut sender = [0u8; 32];
    rng.fill(&mut sender[..]);
    sender[31] = rng.gen_range(0..num_shards.max(1)) as u8;

    Transaction {
        nonce,
        value: rng.gen_range(1..1_000_000u64).to_string(),
        receiver: Bytes::copy_from_slice(&[0xee; 32]),
        sender: Bytes::copy_from_slice(&sender),
        gas_price: 1_000_000_000,
        gas_limit: 50_000,
        data: Bytes::new(),
        chain_id: "local-testnet".into(),
        version: 1,
        signature: Bytes::copy_from_slice(&[0u8; 64]),
    }
}

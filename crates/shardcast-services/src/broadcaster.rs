//! Accumulating broadcaster: the push side of the data-exchange layer.
//!
//! Producers hand over outbound items and return at once. Items pass through
//! a `TimeAccumulator`; each flushed group is split by sender shard, packed
//! into size-bounded packets and every packet is broadcast on its own
//! blocking task on `transactions{communication identifier}`. A failed
//! packet is logged and forgotten.
//!
//! Marshalling and packing of a group run on the blocking pool. The flush
//! consumer awaits one group at a time, so a slow flush holds back the next
//! eviction instead of an async worker.
//!
//! Background tasks (accumulator eviction, flush consumer, counter reporter)
//! stop on `close()`. Dispatches already started run to completion. Pushes
//! after `close()` are refused.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use shardcast_core::wire::{SEND_TRANSACTIONS_PIPE, TRANSACTION_TOPIC};
use shardcast_core::{ShardCoordinator, Transaction};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

use crate::accumulator::TimeAccumulator;
use crate::codec::{JsonMarshaller, Marshaller};
use crate::error::{BroadcastError, SetupError, TransportError};
use crate::interfaces::Messenger;
use crate::packer::pack_data_in_chunks;
use crate::partition::{partition_by_shard, sender_shard};

/// Counter reporter tick.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Something a producer wants on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundItem {
    Transaction(Transaction),
    /// A record with no known route. Accepted by `push`, dropped at flush.
    Unrouted { kind: String, payload: Bytes },
}

impl From<Transaction> for OutboundItem {
    fn from(tx: Transaction) -> Self {
        OutboundItem::Transaction(tx)
    }
}

pub struct BroadcasterArgs<M = JsonMarshaller> {
    pub marshaller: M,
    pub shard_coordinator: Arc<dyn ShardCoordinator>,
    pub messenger: Arc<dyn Messenger>,
    pub max_allowed_time: Duration,
    pub max_deviation_time: Duration,
    /// Packets stay strictly below this many bytes unless a single record
    /// is larger on its own.
    pub max_packet_bytes: usize,
    /// Counter ticks between two throughput reports.
    pub report_every_ticks: u32,
}

#[derive(Debug, Default)]
struct Counters {
    sent_this_tick: AtomicU64,
    total_sent: AtomicU64,
    in_flight: AtomicUsize,
}

pub struct TransactionBroadcaster {
    accumulator: TimeAccumulator<OutboundItem>,
    messenger: Arc<dyn Messenger>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl TransactionBroadcaster {
    /// Start the broadcaster and its background tasks. Must be called inside
    /// a tokio runtime.
    pub fn new<M: Marshaller>(args: BroadcasterArgs<M>) -> Result<Self, SetupError> {
        if args.max_packet_bytes == 0 {
            return Err(SetupError::PacketLimitZero);
        }

        let (shutdown, _) = broadcast::channel::<()>(1);
        let (accumulator, groups) = TimeAccumulator::new(
            args.max_allowed_time,
            args.max_deviation_time,
            shutdown.subscribe(),
        )?;

        let counters = Arc::new(Counters::default());
        let dispatcher = Arc::new(Dispatcher {
            runtime: Handle::current(),
            marshaller: args.marshaller,
            shard_coordinator: args.shard_coordinator,
            messenger: args.messenger.clone(),
            counters: counters.clone(),
            max_packet_bytes: args.max_packet_bytes,
        });

        tokio::spawn(flush_loop(groups, dispatcher, shutdown.subscribe()));
        tokio::spawn(report_loop(
            counters.clone(),
            args.report_every_ticks,
            shutdown.subscribe(),
        ));

        tracing::info!(
            max_allowed_ms = args.max_allowed_time.as_millis() as u64,
            max_deviation_ms = args.max_deviation_time.as_millis() as u64,
            max_packet_bytes = args.max_packet_bytes,
            "transaction broadcaster started"
        );

        Ok(Self {
            accumulator,
            messenger: args.messenger,
            counters,
            closed: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Queue items for the next flush. Never waits on the network.
    pub fn push(&self, items: Vec<OutboundItem>) -> Result<u64, BroadcastError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BroadcastError::Closed);
        }
        if items.is_empty() {
            return Err(BroadcastError::NoItemsToProcess);
        }
        let count = items.len() as u64;
        self.accumulator.add_all(items);
        Ok(count)
    }

    /// Transactions handed to the network so far, as of the last counter tick.
    pub fn total_sent(&self) -> u64 {
        self.counters.total_sent.load(Ordering::Relaxed)
    }

    /// Packet dispatches currently blocked in the messenger.
    pub fn in_flight_dispatches(&self) -> usize {
        self.counters.in_flight.load(Ordering::Relaxed)
    }

    /// Stop background tasks, then close the messenger. Items not yet
    /// flushed are dropped.
    pub fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        // No receivers left means the tasks are already gone.
        let _ = self.shutdown.send(());
        // A push racing with `close` may still land after the drain; it is
        // dropped with the accumulator.
        let dropped = self.accumulator.drain();
        tracing::info!(dropped, "transaction broadcaster closing");
        self.messenger.close()
    }
}

struct Dispatcher<M> {
    runtime: Handle,
    marshaller: M,
    shard_coordinator: Arc<dyn ShardCoordinator>,
    messenger: Arc<dyn Messenger>,
    counters: Arc<Counters>,
    max_packet_bytes: usize,
}

impl<M: Marshaller> Dispatcher<M> {
    fn flush(&self, group: Vec<OutboundItem>) {
        let txs: Vec<Transaction> = group
            .into_iter()
            .filter_map(|item| match item {
                OutboundItem::Transaction(tx) => Some(tx),
                OutboundItem::Unrouted { kind, .. } => {
                    tracing::trace!(kind = %kind, "dropping outbound item with no route");
                    None
                }
            })
            .collect();
        if txs.is_empty() {
            return;
        }

        self.counters
            .sent_this_tick
            .fetch_add(txs.len() as u64, Ordering::Relaxed);
        tracing::trace!(num = txs.len(), "sending transactions");

        let by_shard = partition_by_shard(txs, |tx| {
            sender_shard(tx, self.shard_coordinator.as_ref())
        });
        for (shard, txs) in by_shard {
            let buffs: Vec<Bytes> = txs
                .iter()
                .filter_map(|tx| match self.marshaller.marshal(tx) {
                    Ok(buff) => Some(Bytes::from(buff)),
                    Err(err) => {
                        tracing::warn!(nonce = tx.nonce, error = %err, "transaction marshal failed");
                        None
                    }
                })
                .collect();
            if buffs.is_empty() {
                continue;
            }

            let topic = format!(
                "{TRANSACTION_TOPIC}{}",
                self.shard_coordinator.communication_identifier(shard)
            );
            match pack_data_in_chunks(&self.marshaller, &buffs, self.max_packet_bytes) {
                Ok(packets) => {
                    for packet in packets {
                        self.dispatch(topic.clone(), packet);
                    }
                }
                Err(err) => tracing::debug!(shard, error = %err, "packing transactions failed"),
            }
        }
    }

    /// Fire and forget one packet on its own blocking task.
    fn dispatch(&self, topic: String, packet: Bytes) {
        let messenger = self.messenger.clone();
        let counters = self.counters.clone();
        counters.in_flight.fetch_add(1, Ordering::Relaxed);

        self.runtime.spawn_blocking(move || {
            tracing::trace!(topic = %topic, size = packet.len(), "broadcasting packet");
            if let Err(err) =
                messenger.broadcast_on_channel_blocking(SEND_TRANSACTIONS_PIPE, &topic, packet)
            {
                tracing::debug!(topic = %topic, error = %err, "packet broadcast failed");
            }
            counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

async fn flush_loop<M: Marshaller>(
    mut groups: mpsc::Receiver<Vec<OutboundItem>>,
    dispatcher: Arc<Dispatcher<M>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let group = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("broadcaster flush loop stopping");
                return;
            }
            group = groups.recv() => match group {
                Some(group) => group,
                None => return,
            }
        };

        let dispatcher = dispatcher.clone();
        let flushing = tokio::task::spawn_blocking(move || dispatcher.flush(group));
        tokio::select! {
            // The flush in progress finishes on its own.
            _ = shutdown.recv() => {
                tracing::debug!("broadcaster flush loop stopping mid-flush");
                return;
            }
            flushed = flushing => {
                if let Err(err) = flushed {
                    tracing::warn!(error = %err, "transaction flush task failed");
                }
            }
        }
    }
}

/// Peak per-tick throughput over a reporting window.
#[derive(Debug)]
struct PeakWindow {
    peak: u64,
    ticks: u32,
    report_every: u32,
}

impl PeakWindow {
    fn new(report_every: u32) -> Self {
        Self {
            peak: 0,
            ticks: 0,
            report_every: report_every.max(1),
        }
    }

    /// Fold one tick in. At the end of a window returns the window's peak if
    /// anything was sent, and starts a new window.
    fn tick(&mut self, sent: u64) -> Option<u64> {
        self.peak = self.peak.max(sent);
        self.ticks += 1;
        if self.ticks < self.report_every {
            return None;
        }
        self.ticks = 0;
        Some(std::mem::take(&mut self.peak)).filter(|peak| *peak > 0)
    }
}

async fn report_loop(
    counters: Arc<Counters>,
    report_every_ticks: u32,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut window = PeakWindow::new(report_every_ticks);
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = interval.tick() => {
                let sent = counters.sent_this_tick.swap(0, Ordering::Relaxed);
                let total = counters.total_sent.fetch_add(sent, Ordering::Relaxed) + sent;
                if let Some(peak) = window.tick(sent) {
                    tracing::info!(max_per_sec = peak, total, "sent transactions on network");
                }
            }
        }
    }
}

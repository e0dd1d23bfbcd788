use crate::*;

use std::collections::HashSet;

use shardcast_core::{MultiShardCoordinator, Transaction};
use shardcast_services::{BroadcastError, BroadcasterArgs, OutboundItem, TransactionBroadcaster};

const WAIT: Duration = Duration::from_secs(5);

fn tx(nonce: u64, sender_last_byte: u8) -> Transaction {
    Transaction {
        nonce,
        value: "1000".into(),
        receiver: Bytes::from_static(&[0xee; 32]),
        sender: Bytes::from(vec![0x11, 0x22, sender_last_byte]),
        gas_price: 1_000_000_000,
        gas_limit: 50_000,
        data: Bytes::from_static(b"transfer"),
        chain_id: "integration".into(),
        version: 1,
        signature: Bytes::from_static(&[0x5a; 64]),
    }
}

/// A broadcaster in shard 0 of two, sending through `node`.
fn broadcaster(node: LoopbackNode) -> TransactionBroadcaster {
    TransactionBroadcaster::new(BroadcasterArgs {
        marshaller: JsonMarshaller,
        shard_coordinator: Arc::new(MultiShardCoordinator::new(2, 0).unwrap()),
        messenger: Arc::new(node),
        max_allowed_time: Duration::from_millis(40),
        max_deviation_time: Duration::from_millis(10),
        max_packet_bytes: shardcast_core::wire::MAX_BULK_TRANSACTION_SIZE,
        report_every_ticks: 20,
    })
    .unwrap()
}

/// Unpack a transaction packet delivered on a topic.
fn received(delivery: Delivery) -> (String, Vec<Transaction>) {
    let Delivery::Topic(message) = delivery else {
        panic!("expected a topic delivery");
    };
    let batch: Batch = serde_json::from_slice(&message.data).unwrap();
    let txs = batch
        .data
        .iter()
        .map(|b| serde_json::from_slice(b).unwrap())
        .collect();
    (message.topic, txs)
}

/// Transactions land on the topic of their sender's shard, and only
/// subscribers of that topic see them.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transactions_reach_shard_subscribers() -> Result<()> {
    let network = LoopbackNetwork::new();
    let (sender, _sender_inbox) = network.join(PeerId::new(&b"sender"[..]));
    let (own_shard, mut own_inbox) = network.join(PeerId::new(&b"shard-0"[..]));
    let (cross_shard, mut cross_inbox) = network.join(PeerId::new(&b"shard-1"[..]));
    own_shard.subscribe("transactions_0");
    cross_shard.subscribe("transactions_0_1");

    let b = broadcaster(sender);
    let items: Vec<OutboundItem> = (0..9u64).map(|n| tx(n, n as u8).into()).collect();
    assert_eq!(b.push(items)?, 9);

    let (topic, txs) = received(next_delivery(&mut own_inbox, WAIT).await?);
    assert_eq!(topic, "transactions_0");
    assert_eq!(txs.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);

    let (topic, txs) = received(next_delivery(&mut cross_inbox, WAIT).await?);
    assert_eq!(topic, "transactions_0_1");
    assert_eq!(txs.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![1, 3, 5, 7]);

    // One packet per shard, nothing more.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(own_inbox.try_recv().is_err());
    assert!(cross_inbox.try_recv().is_err());

    b.close()?;
    Ok(())
}

/// Concurrent producers never wait on the network, and every transaction
/// they push arrives exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_deliver_everything_once() -> Result<()> {
    let network = LoopbackNetwork::new();
    let (sender, _sender_inbox) = network.join(PeerId::new(&b"sender"[..]));
    let (receiver, mut inbox) = network.join(PeerId::new(&b"receiver"[..]));
    receiver.subscribe("transactions_0");

    let b = Arc::new(broadcaster(sender));
    let producers: Vec<_> = (0..8u64)
        .map(|p| {
            let b = b.clone();
            tokio::spawn(async move {
                for i in 0..50u64 {
                    // Even last byte: everything goes to shard 0.
                    b.push(vec![tx(p * 1000 + i, 2).into()]).unwrap();
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await?;
    }

    let mut seen = HashSet::new();
    while seen.len() < 400 {
        let (_, txs) = received(next_delivery(&mut inbox, WAIT).await?);
        for t in txs {
            assert!(seen.insert(t.nonce), "nonce {} delivered twice", t.nonce);
        }
    }
    assert_eq!(seen.len(), 400);

    b.close()?;
    Ok(())
}

/// After close, pushes are refused and nothing reaches the network.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_broadcaster_goes_quiet() -> Result<()> {
    let network = LoopbackNetwork::new();
    let (sender, _sender_inbox) = network.join(PeerId::new(&b"sender"[..]));
    let (receiver, mut inbox) = network.join(PeerId::new(&b"receiver"[..]));
    receiver.subscribe("transactions_0");

    let b = broadcaster(sender);
    b.close()?;
    assert_eq!(network.peers(), vec![PeerId::new(&b"receiver"[..])]);

    assert!(matches!(
        b.push(vec![tx(1, 0).into()]),
        Err(BroadcastError::Closed)
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(inbox.try_recv().is_err());
    Ok(())
}

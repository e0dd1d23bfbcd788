use crate::*;

fn records(range: std::ops::Range<usize>) -> Vec<Bytes> {
    range.map(validator_record).collect()
}

/// Chunk 0 announces the chunk count; walking every chunk from one peer
/// yields the whole universe in sorted key order.
#[test]
fn test_chunk_sync_walks_whole_universe() {
    let mut c = cluster(2, 12, 5);
    let (a, b) = c.peers.split_at_mut(1);
    let (a, b) = (&mut a[0], &mut b[0]);

    a.resolver.request_by_chunk(0, 1).unwrap();
    assert!(b.pump().is_empty());
    let first = a.pump();
    assert_eq!(first.len(), 1);
    let (from, batch) = &first[0];
    assert_eq!(from, &b.pid);
    assert_eq!(batch.chunk_index, 0);
    assert_eq!(batch.max_chunks, 3);
    assert_eq!(batch.reference, None);

    let mut synced = batch.data.clone();
    for index in 1..batch.max_chunks {
        a.resolver.request_by_chunk(index, 1).unwrap();
        b.pump();
        let mut answer = a.pump();
        assert_eq!(answer.len(), 1);
        let (_, batch) = answer.remove(0);
        assert_eq!(batch.chunk_index, index);
        assert_eq!(batch.max_chunks, 3);
        synced.extend(batch.data);
    }

    assert_eq!(synced, records(0..12));
}

/// Every other peer on the request topic answers, with the same chunk.
#[test]
fn test_every_peer_answers_a_chunk_request() {
    let mut c = cluster(4, 12, 5);
    c.peers[0].resolver.request_by_chunk(2, 0).unwrap();
    for peer in &mut c.peers[1..] {
        assert!(peer.pump().is_empty());
    }

    let answers = c.peers[0].pump();
    assert_eq!(answers.len(), 3);
    for (_, batch) in answers {
        assert_eq!(batch.data, records(10..12));
        assert_eq!(batch.chunk_index, 2);
    }
}

#[test]
fn test_out_of_range_chunk_gets_no_answer() {
    let mut c = cluster(2, 12, 5);
    c.peers[0].resolver.request_by_chunk(3, 0).unwrap();

    let verdict = c.peers[1].serve_one();
    assert!(matches!(
        verdict,
        Err(ResolverError::InvalidChunkIndex {
            index: 3,
            max_chunks: 3
        })
    ));
    assert!(c.peers[0].pump().is_empty());
}

#[test]
fn test_small_key_set_answered_whole() {
    let mut c = cluster(2, 12, 5);
    let keys = vec![validator_key(7), Bytes::from_static(b"stranger"), validator_key(2)];
    c.peers[0].resolver.request_by_key_set(keys.clone()).unwrap();
    c.peers[1].pump();

    let answers = c.peers[0].pump();
    assert_eq!(answers.len(), 1);
    let (_, batch) = &answers[0];
    assert_eq!(batch.data, vec![validator_record(7), validator_record(2)]);
    assert!(!batch.is_chunked());

    let reference: Batch = serde_json::from_slice(batch.reference.as_ref().unwrap()).unwrap();
    assert_eq!(reference.data, keys);
}

#[test]
fn test_large_key_set_answered_with_first_chunk() {
    let mut c = cluster(2, 12, 5);
    let keys: Vec<Bytes> = (0..8).map(validator_key).collect();
    c.peers[0].resolver.request_by_key_set(keys).unwrap();
    c.peers[1].pump();

    let answers = c.peers[0].pump();
    assert_eq!(answers.len(), 1);
    let (_, batch) = &answers[0];
    assert_eq!(batch.data, records(0..5));
    assert_eq!(batch.chunk_index, 0);
    assert_eq!(batch.max_chunks, 2);
    assert!(batch.reference.is_some());
}

#[test]
fn test_unknown_keys_get_no_answer() {
    let mut c = cluster(2, 12, 5);
    c.peers[0]
        .resolver
        .request_by_key_set(vec![Bytes::from_static(b"nobody")])
        .unwrap();

    assert!(matches!(
        c.peers[1].serve_one(),
        Err(ResolverError::RecordNotFound)
    ));
    assert!(c.peers[0].pump().is_empty());
}

#[test]
fn test_single_key_request_not_served() {
    let mut c = cluster(2, 12, 5);
    c.peers[0].resolver.request_by_key(validator_key(1)).unwrap();

    assert!(matches!(
        c.peers[1].serve_one(),
        Err(ResolverError::RequestTypeNotImplemented { .. })
    ));
    assert!(c.peers[0].pump().is_empty());
}

#[test]
fn test_flooding_requester_is_refused() {
    // Two messages of burst and no refill.
    let mut c = cluster_with_antiflood(2, 12, 5, || {
        let guard = PeerFloodGuard::with_limits((2.0, 0.0), (100.0, 0.0));
        Arc::new(guard) as Arc<dyn AntifloodHandler>
    });

    for _ in 0..3 {
        c.peers[0].resolver.request_by_chunk(0, 0).unwrap();
    }
    assert!(c.peers[1].serve_one().is_ok());
    assert!(c.peers[1].serve_one().is_ok());
    assert!(matches!(
        c.peers[1].serve_one(),
        Err(ResolverError::Admission { .. })
    ));

    assert_eq!(c.peers[0].pump().len(), 2);
}

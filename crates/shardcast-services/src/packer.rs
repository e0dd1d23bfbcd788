//! Packs serialized records into size-bounded packets.
//!
//! Each packet is a marshalled `Batch`. Records are appended to the current
//! packet while its marshalled size stays below `limit`. A record too large
//! to fit even alone is sent in a packet of its own. Record order is kept
//! across packets.
//!
//! Packet sizes are tracked as a running total: every record is marshalled
//! once inside a single-entry `Batch`, and the framing overhead of the
//! envelope and of the separator between two entries is measured up front.
//! Only closed packets are marshalled whole. A packet whose real size misses
//! the running estimate is split in halves until every part fits.

use bytes::Bytes;
use shardcast_core::Batch;

use crate::codec::Marshaller;
use crate::error::BroadcastError;

pub fn pack_data_in_chunks<M: Marshaller>(
    marshaller: &M,
    data: &[Bytes],
    limit: usize,
) -> Result<Vec<Bytes>, BroadcastError> {
    if limit == 0 {
        return Err(BroadcastError::InvalidPacketLimit);
    }
    let Some(first) = data.first() else {
        return Ok(Vec::new());
    };

    let framing = Framing::measure(marshaller, first)?;
    let mut packets = Vec::new();
    let mut start = 0;
    // Estimated marshalled size of `data[start..i]`.
    let mut size = 0;

    for (i, element) in data.iter().enumerate() {
        let cost = framing.entry_cost(marshaller, element)?;
        if i > start {
            let grown = size + framing.separator + cost;
            if grown < limit {
                size = grown;
                continue;
            }
            close_packet(marshaller, &data[start..i], limit, &mut packets)?;
            start = i;
        }

        size = framing.envelope + cost;
        if size >= limit {
            // Oversized on its own.
            close_packet(marshaller, &data[i..=i], limit, &mut packets)?;
            start = i + 1;
        }
    }

    if start < data.len() {
        close_packet(marshaller, &data[start..], limit, &mut packets)?;
    }
    Ok(packets)
}

/// Byte overhead of the `Batch` envelope under a given marshaller.
#[derive(Debug, Clone, Copy)]
struct Framing {
    /// Size of an empty `Batch`.
    envelope: usize,
    /// Extra bytes between two consecutive entries.
    separator: usize,
}

impl Framing {
    fn measure<M: Marshaller>(marshaller: &M, sample: &Bytes) -> Result<Self, BroadcastError> {
        let envelope = marshal(marshaller, &[])?.len();
        let one = marshal(marshaller, std::slice::from_ref(sample))?.len();
        let two = marshal(marshaller, &[sample.clone(), sample.clone()])?.len();
        Ok(Self {
            envelope,
            separator: (two + envelope).saturating_sub(2 * one),
        })
    }

    /// Bytes one entry adds to a `Batch`, separator excluded.
    fn entry_cost<M: Marshaller>(
        &self,
        marshaller: &M,
        entry: &Bytes,
    ) -> Result<usize, BroadcastError> {
        let single = marshal(marshaller, std::slice::from_ref(entry))?.len();
        Ok(single.saturating_sub(self.envelope))
    }
}

fn marshal<M: Marshaller>(marshaller: &M, entries: &[Bytes]) -> Result<Bytes, BroadcastError> {
    Ok(Bytes::from(marshaller.marshal(&Batch::of(entries.to_vec()))?))
}

/// Marshal `entries` as one packet, halving it while it does not fit.
fn close_packet<M: Marshaller>(
    marshaller: &M,
    entries: &[Bytes],
    limit: usize,
    packets: &mut Vec<Bytes>,
) -> Result<(), BroadcastError> {
    let packet = marshal(marshaller, entries)?;
    if packet.len() < limit || entries.len() == 1 {
        packets.push(packet);
        return Ok(());
    }
    let (head, tail) = entries.split_at(entries.len() / 2);
    close_packet(marshaller, head, limit, packets)?;
    close_packet(marshaller, tail, limit, packets)
}

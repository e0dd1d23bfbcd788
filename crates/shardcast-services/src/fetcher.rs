//! Record lookup: public key → last known peer id → cached record.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::ResolverError;
use crate::interfaces::{PeerShardMapper, RecordCache};

#[derive(Clone)]
pub struct RecordFetcher {
    mapper: Arc<dyn PeerShardMapper>,
    cache: Arc<dyn RecordCache>,
}

impl RecordFetcher {
    pub fn new(mapper: Arc<dyn PeerShardMapper>, cache: Arc<dyn RecordCache>) -> Self {
        Self { mapper, cache }
    }

    /// Record for one public key, if both hops resolve.
    pub fn fetch(&self, public_key: &[u8]) -> Option<Bytes> {
        let pid = self.mapper.last_known_peer_id(public_key)?;
        self.cache.peek(pid.as_bytes())
    }

    /// Records for every key that resolves, in key order. Misses are skipped.
    /// Fails only when nothing resolves.
    pub fn fetch_all(&self, public_keys: &[Bytes]) -> Result<Vec<Bytes>, ResolverError> {
        let records: Vec<Bytes> = public_keys
            .iter()
            .filter_map(|pk| {
                let record = self.fetch(pk);
                if record.is_none() {
                    tracing::trace!(pk = hex::encode(pk), "no record for key");
                }
                record
            })
            .collect();

        if records.is_empty() {
            return Err(ResolverError::RecordNotFound);
        }
        Ok(records)
    }
}

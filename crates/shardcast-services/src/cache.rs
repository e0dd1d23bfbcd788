//! In-memory record pool keyed by transport peer id.
//!
//! The data-exchange layer only peeks. Inserts come from whoever validates
//! and stores records (interceptors, bootstrap), outside this crate.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::interfaces::RecordCache;

/// Concurrent record pool. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryRecordCache {
    records: Arc<DashMap<Bytes, Bytes>>,
}

impl MemoryRecordCache {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    /// Store a record. Replaces any previous record for the key.
    pub fn put(&self, key: impl Into<Bytes>, record: impl Into<Bytes>) {
        let key = key.into();
        tracing::trace!(key = hex::encode(&key), "record cached");
        self.records.insert(key, record.into());
    }

    pub fn remove(&self, key: &[u8]) -> Option<Bytes> {
        self.records.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

impl RecordCache for MemoryRecordCache {
    fn peek(&self, key: &[u8]) -> Option<Bytes> {
        self.records.get(key).map(|r| r.value().clone())
    }
}

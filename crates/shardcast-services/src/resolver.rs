//! Chunked resolver: answers peers' requests for identity records.
//!
//! Two request shapes are served:
//!   key set: the records for an explicit list of public keys. Small answers
//!           go out whole; large ones go out as chunk 0 with `max_chunks`
//!           set, and the requester follows up with chunk requests.
//!   chunk:   one slice of the epoch's sorted validator key universe.
//!
//! Single-key requests are not served here: callers send a key set of one.
//!
//! Every answer is a marshalled `Batch` sent straight back to the peer the
//! request came from. Failures are returned to the transport dispatcher and
//! no answer is sent; the requester re-requests if it still cares.

use std::sync::Arc;

use bytes::Bytes;
use shardcast_core::wire::InboundMessage;
use shardcast_core::{Batch, PeerId, Request, RequestData, RequestKind};

use crate::chunking::{extract_chunk, max_chunks, sorted_keys};
use crate::codec::{JsonMarshaller, Marshaller};
use crate::error::{ResolverError, SetupError};
use crate::fetcher::RecordFetcher;
use crate::interfaces::{
    AntifloodHandler, NodesCoordinator, PeerShardMapper, RecordCache, RequestSender, Throttler,
};
use crate::throttle::ThrottleSlot;

/// Smallest accepted records-per-response setting.
pub const MIN_RECORDS_PER_RESPONSE: usize = shardcast_core::config::MIN_RECORDS_PER_RESPONSE;

/// Everything a resolver is built from.
pub struct ResolverArgs<M = JsonMarshaller> {
    pub marshaller: M,
    pub sender: Arc<dyn RequestSender>,
    pub antiflood: Arc<dyn AntifloodHandler>,
    pub throttler: Arc<dyn Throttler>,
    pub record_cache: Arc<dyn RecordCache>,
    pub peer_shard_mapper: Arc<dyn PeerShardMapper>,
    pub nodes_coordinator: Arc<dyn NodesCoordinator>,
    /// Protocol constant: every node must use the same value.
    pub max_records_per_response: usize,
}

pub struct ChunkedResolver<M = JsonMarshaller> {
    marshaller: M,
    sender: Arc<dyn RequestSender>,
    antiflood: Arc<dyn AntifloodHandler>,
    throttler: Arc<dyn Throttler>,
    fetcher: RecordFetcher,
    nodes_coordinator: Arc<dyn NodesCoordinator>,
    max_records_per_response: usize,
    topic: String,
}

impl<M: Marshaller> ChunkedResolver<M> {
    pub fn new(args: ResolverArgs<M>) -> Result<Self, SetupError> {
        if args.max_records_per_response < MIN_RECORDS_PER_RESPONSE {
            return Err(SetupError::MaxRecordsTooSmall {
                min: MIN_RECORDS_PER_RESPONSE,
                got: args.max_records_per_response,
            });
        }

        let topic = args.sender.request_topic();
        Ok(Self {
            marshaller: args.marshaller,
            sender: args.sender,
            antiflood: args.antiflood,
            throttler: args.throttler,
            fetcher: RecordFetcher::new(args.peer_shard_mapper, args.record_cache),
            nodes_coordinator: args.nodes_coordinator,
            max_records_per_response: args.max_records_per_response,
            topic,
        })
    }

    /// Topic this resolver answers on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    // ── Requesting ───────────────────────────────────────────────────────────

    /// Ask peers for the record of one public key.
    pub fn request_by_key(&self, key: Bytes) -> Result<(), ResolverError> {
        let rd = RequestData {
            kind: RequestKind::Hash,
            value: key.clone(),
            epoch: 0,
            chunk_index: 0,
        };
        self.send_request(&rd, &[key])
    }

    /// Ask peers for the records of several public keys.
    pub fn request_by_key_set(&self, keys: Vec<Bytes>) -> Result<(), ResolverError> {
        let value = self
            .marshaller
            .marshal(&Batch::of(keys.clone()))
            .map_err(ResolverError::Codec)?;

        let rd = RequestData {
            kind: RequestKind::HashArray,
            value: Bytes::from(value),
            epoch: 0,
            chunk_index: 0,
        };
        self.send_request(&rd, &keys)
    }

    /// Ask peers for chunk `chunk_index` of the epoch's validator records.
    pub fn request_by_chunk(&self, chunk_index: u32, epoch: u32) -> Result<(), ResolverError> {
        let chunk_buffer = Bytes::copy_from_slice(&chunk_index.to_be_bytes());
        let value = self
            .marshaller
            .marshal(&Batch::of(vec![chunk_buffer.clone()]))
            .map_err(ResolverError::Codec)?;

        let rd = RequestData {
            kind: RequestKind::Chunk,
            value: Bytes::from(value),
            epoch,
            chunk_index,
        };
        self.send_request(&rd, &[chunk_buffer])
    }

    fn send_request(&self, rd: &RequestData, original_keys: &[Bytes]) -> Result<(), ResolverError> {
        let payload = self.marshaller.marshal(rd).map_err(ResolverError::Codec)?;
        self.sender
            .send_on_request_topic(Bytes::from(payload), original_keys)?;
        Ok(())
    }

    // ── Serving ──────────────────────────────────────────────────────────────

    /// Handle one message delivered on the request topic.
    pub fn process_received_message(
        &self,
        message: &InboundMessage,
        from: &PeerId,
    ) -> Result<(), ResolverError> {
        self.can_process_message(message, from)?;

        let _slot = ThrottleSlot::acquire(self.throttler.as_ref());

        let request = self.parse_received_message(message)?;
        match request {
            Request::ByChunk { index, epoch } => self.resolve_chunk_request(index, epoch, from),
            Request::ByKeySet(keys_buff) => self.resolve_multiple_keys_request(keys_buff, from),
            Request::ByKey(value) => Err(ResolverError::RequestTypeNotImplemented {
                kind: RequestKind::Hash,
                value: hex::encode(value),
            }),
            Request::Unsupported { kind, value } => {
                Err(ResolverError::RequestTypeNotImplemented {
                    kind,
                    value: hex::encode(value),
                })
            }
        }
    }

    fn can_process_message(
        &self,
        message: &InboundMessage,
        from: &PeerId,
    ) -> Result<(), ResolverError> {
        self.antiflood
            .can_process_message(message, from)
            .map_err(|source| ResolverError::Admission {
                topic: self.topic.clone(),
                source,
            })?;

        self.antiflood
            .can_process_messages_on_topic(
                from,
                &self.topic,
                1,
                message.data.len() as u64,
                message.seq_no,
            )
            .map_err(|source| ResolverError::Admission {
                topic: self.topic.clone(),
                source,
            })?;

        if !self.throttler.can_process() {
            return Err(ResolverError::SystemBusy {
                topic: self.topic.clone(),
            });
        }
        Ok(())
    }

    fn parse_received_message(&self, message: &InboundMessage) -> Result<Request, ResolverError> {
        let rd: RequestData = self
            .marshaller
            .unmarshal(&message.data)
            .map_err(ResolverError::Decode)?;
        if rd.value.is_empty() {
            return Err(ResolverError::EmptyValue);
        }
        Ok(Request::from(rd))
    }

    fn resolve_chunk_request(
        &self,
        chunk_index: u32,
        epoch: u32,
        from: &PeerId,
    ) -> Result<(), ResolverError> {
        let sorted = self.sorted_validator_keys(epoch)?;
        if sorted.is_empty() {
            tracing::debug!(epoch, chunk_index, "chunk request for an empty key universe");
            return Ok(());
        }

        let max_chunks = max_chunks(sorted.len(), self.max_records_per_response);
        let keys = extract_chunk(&sorted, self.max_records_per_response, chunk_index).ok_or(
            ResolverError::InvalidChunkIndex {
                index: chunk_index,
                max_chunks,
            },
        )?;

        let records = self.fetcher.fetch_all(keys)?;
        tracing::debug!(
            peer = %from,
            epoch,
            chunk_index,
            max_chunks,
            records = records.len(),
            "resolved chunk request"
        );
        self.send_data(records, None, chunk_index, max_chunks, from)
    }

    /// All eligible validator keys of the epoch, merged across shards and
    /// sorted by raw bytes.
    fn sorted_validator_keys(&self, epoch: u32) -> Result<Vec<Bytes>, ResolverError> {
        let by_shard = self.nodes_coordinator.all_eligible_validators_keys(epoch)?;
        Ok(sorted_keys(by_shard.into_values()))
    }

    fn resolve_multiple_keys_request(
        &self,
        keys_buff: Bytes,
        from: &PeerId,
    ) -> Result<(), ResolverError> {
        let batch: Batch = self
            .marshaller
            .unmarshal(&keys_buff)
            .map_err(ResolverError::Decode)?;

        let records = self.fetcher.fetch_all(&batch.data)?;
        tracing::debug!(
            peer = %from,
            requested = batch.data.len(),
            found = records.len(),
            max_in_response = self.max_records_per_response,
            "resolved key set request"
        );

        if records.len() <= self.max_records_per_response {
            return self.send_data(records, Some(keys_buff), 0, 0, from);
        }
        self.send_first_chunk(records, keys_buff, from)
    }

    /// Too many records for one response: send chunk 0 and announce the count.
    fn send_first_chunk(
        &self,
        records: Vec<Bytes>,
        reference: Bytes,
        from: &PeerId,
    ) -> Result<(), ResolverError> {
        let max_chunks = max_chunks(records.len(), self.max_records_per_response);
        let chunk = extract_chunk(&records, self.max_records_per_response, 0).ok_or(
            ResolverError::InvalidChunkIndex {
                index: 0,
                max_chunks,
            },
        )?;

        self.send_data(chunk.to_vec(), Some(reference), 0, max_chunks, from)
    }

    fn send_data(
        &self,
        data: Vec<Bytes>,
        reference: Option<Bytes>,
        chunk_index: u32,
        max_chunks: usize,
        to: &PeerId,
    ) -> Result<(), ResolverError> {
        let batch = Batch {
            data,
            reference,
            chunk_index,
            max_chunks: u32::try_from(max_chunks).unwrap_or(u32::MAX),
        };
        let buff = self.marshaller.marshal(&batch).map_err(ResolverError::Codec)?;

        tracing::trace!(peer = %to, count = batch.data.len(), bytes = buff.len(), "sending records");
        self.sender.send_direct(Bytes::from(buff), to)?;
        Ok(())
    }
}

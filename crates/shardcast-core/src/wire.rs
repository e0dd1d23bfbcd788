//! shardcast wire format: the envelopes exchanged between nodes.
//!
//! Requests travel on a resolver's request topic as a marshalled
//! `RequestData`. Responses travel back directly to the requester as a
//! marshalled `Batch`. Broadcast packets are also marshalled `Batch`es,
//! each entry one marshalled record.
//!
//! Record encoding itself is not defined here. A `Batch` only carries
//! opaque byte strings.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Topics ────────────────────────────────────────────────────────────────────

/// Prefix of the per-shard-pair transaction broadcast topics.
/// Full topic: `transactions` + communication identifier, e.g. `transactions_0_1`.
pub const TRANSACTION_TOPIC: &str = "transactions";

/// Base topic for peer authentication records.
pub const PEER_AUTHENTICATION_TOPIC: &str = "peerAuthentication";

/// Appended to a base topic to form the topic requests are sent on.
pub const REQUEST_TOPIC_SUFFIX: &str = "_REQUEST";

/// Messenger pipe used by the transaction broadcaster.
pub const SEND_TRANSACTIONS_PIPE: &str = "send transactions pipe";

/// Upper bound on one marshalled transaction packet (256 KiB).
pub const MAX_BULK_TRANSACTION_SIZE: usize = 1 << 18;

// ── Peer identity ─────────────────────────────────────────────────────────────

/// Transport-level peer identifier.
///
/// Distinct from a node's public key: the same validator key can be seen
/// behind different transport ids over time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Bytes);

impl PeerId {
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self(id.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn pretty(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.pretty())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

// ── Inbound message ───────────────────────────────────────────────────────────

/// A message as delivered by the transport to a topic handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Raw payload bytes.
    pub data: Bytes,
    /// Originator of the message (may differ from the connected peer that relayed it).
    pub peer: PeerId,
    /// Topic the message arrived on.
    pub topic: String,
    /// Transport sequence number.
    pub seq_no: u64,
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Request discriminator as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A single key.
    Hash,
    /// A marshalled `Batch` of keys.
    HashArray,
    /// A block nonce. Not served by the chunked resolvers.
    Nonce,
    /// An epoch number. Not served by the chunked resolvers.
    Epoch,
    /// A chunk index over the epoch's sorted key universe.
    Chunk,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hash => "hash",
            Self::HashArray => "hash_array",
            Self::Nonce => "nonce",
            Self::Epoch => "epoch",
            Self::Chunk => "chunk",
        };
        f.write_str(name)
    }
}

/// The request envelope sent on a request topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    pub kind: RequestKind,
    pub value: Bytes,
    #[serde(default)]
    pub epoch: u32,
    #[serde(default)]
    pub chunk_index: u32,
}

/// A decoded request, one variant per kind.
///
/// `ByKeySet` keeps the still-marshalled key batch: it is echoed back as the
/// response `Reference` so the requester can correlate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ByKey(Bytes),
    ByKeySet(Bytes),
    ByChunk { index: u32, epoch: u32 },
    Unsupported { kind: RequestKind, value: Bytes },
}

impl From<RequestData> for Request {
    fn from(rd: RequestData) -> Self {
        match rd.kind {
            RequestKind::Hash => Request::ByKey(rd.value),
            RequestKind::HashArray => Request::ByKeySet(rd.value),
            RequestKind::Chunk => Request::ByChunk {
                index: rd.chunk_index,
                epoch: rd.epoch,
            },
            kind @ (RequestKind::Nonce | RequestKind::Epoch) => Request::Unsupported {
                kind,
                value: rd.value,
            },
        }
    }
}

// ── Batch envelope ────────────────────────────────────────────────────────────

/// Ordered list of opaque records plus chunk metadata.
///
/// `max_chunks == 0` means the response is not chunked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub data: Vec<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Bytes>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub max_chunks: u32,
}

impl Batch {
    /// A plain list of items with no chunk metadata.
    pub fn of(data: Vec<Bytes>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.max_chunks != 0
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// A user transaction as pushed by producers and broadcast to its sender's shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    /// Decimal amount. Kept as a string so arbitrarily large values survive JSON.
    pub value: String,
    pub receiver: Bytes,
    pub sender: Bytes,
    pub gas_price: u64,
    pub gas_limit: u64,
    #[serde(default)]
    pub data: Bytes,
    pub chain_id: String,
    pub version: u32,
    #[serde(default)]
    pub signature: Bytes,
}

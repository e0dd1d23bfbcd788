//! Error types for the data-exchange services.

use shardcast_core::{PeerId, RequestKind};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("marshal failed: {0}")]
    Marshal(#[source] BoxError),
    #[error("unmarshal failed: {0}")]
    Unmarshal(#[source] BoxError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} not connected")]
    PeerNotFound(PeerId),
    #[error("no subscribers on topic {0}")]
    TopicNotFound(String),
    #[error("messenger closed")]
    Closed,
    #[error("transport failure: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("peer {peer} is flooding")]
    Flooded { peer: PeerId },
    #[error("peer {peer} is flooding topic {topic}")]
    TopicFlooded { peer: PeerId, topic: String },
}

#[derive(Debug, thiserror::Error)]
#[error("membership unavailable for epoch {epoch}: {reason}")]
pub struct MembershipError {
    pub epoch: u32,
    pub reason: String,
}

/// Construction-time failures. Never produced while serving requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("max records per response must be at least {min}, got {got}")]
    MaxRecordsTooSmall { min: usize, got: usize },
    #[error("max allowed time must be at least {min_ms}ms")]
    MaxAllowedTimeTooSmall { min_ms: u64 },
    #[error("max deviation time must be below max allowed time")]
    DeviationNotBelowAllowed,
    #[error("max packet size must be greater than zero")]
    PacketLimitZero,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("{source} on resolver topic {topic}")]
    Admission {
        topic: String,
        #[source]
        source: AdmissionError,
    },
    #[error("system busy on resolver topic {topic}")]
    SystemBusy { topic: String },
    #[error("malformed request: {0}")]
    Decode(#[source] CodecError),
    #[error("request carries an empty value")]
    EmptyValue,
    #[error("invalid chunk index {index}, max chunks {max_chunks}")]
    InvalidChunkIndex { index: u32, max_chunks: usize },
    #[error("no record found for the requested keys")]
    RecordNotFound,
    #[error("request type {kind} not implemented for value {value}")]
    RequestTypeNotImplemented { kind: RequestKind, value: String },
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
    #[error("encode failed: {0}")]
    Codec(#[source] CodecError),
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("no items to process")]
    NoItemsToProcess,
    #[error("broadcaster closed")]
    Closed,
    #[error("max packet size must be greater than zero")]
    InvalidPacketLimit,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

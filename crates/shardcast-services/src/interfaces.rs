//! Collaborator traits: the narrow seams between the data-exchange layer
//! and the rest of the node.
//!
//! Transport, admission policy, membership and storage all live outside
//! this crate. Components hold them as `Arc<dyn Trait>` so a node can
//! wire real implementations and tests can wire stubs.

use std::collections::HashMap;

use bytes::Bytes;
use shardcast_core::wire::InboundMessage;
use shardcast_core::{PeerId, ShardId};

use crate::error::{AdmissionError, MembershipError, TransportError};

/// Outbound side of a resolver: requests on its topic, responses direct.
pub trait RequestSender: Send + Sync {
    /// Topic requests for this resolver are published on.
    fn request_topic(&self) -> String;

    /// Publish a marshalled request. `original_keys` are the keys the
    /// request asks for, for the sender's own bookkeeping.
    fn send_on_request_topic(
        &self,
        payload: Bytes,
        original_keys: &[Bytes],
    ) -> Result<(), TransportError>;

    /// Send a payload to one connected peer.
    fn send_direct(&self, payload: Bytes, peer: &PeerId) -> Result<(), TransportError>;
}

/// Pub/sub side of the transport, used by the broadcaster.
pub trait Messenger: Send + Sync {
    /// Blocks until the payload is handed to the network on `topic`.
    fn broadcast_on_channel_blocking(
        &self,
        pipe: &str,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    fn close(&self) -> Result<(), TransportError>;
}

/// Flood protection policy.
pub trait AntifloodHandler: Send + Sync {
    fn can_process_message(
        &self,
        message: &InboundMessage,
        from: &PeerId,
    ) -> Result<(), AdmissionError>;

    fn can_process_messages_on_topic(
        &self,
        peer: &PeerId,
        topic: &str,
        num_messages: u32,
        total_size: u64,
        seq_no: u64,
    ) -> Result<(), AdmissionError>;
}

/// Bound on concurrently processed inbound requests.
pub trait Throttler: Send + Sync {
    fn can_process(&self) -> bool;
    fn start_processing(&self);
    fn end_processing(&self);
}

/// Read-only view of a record pool keyed by transport peer id.
pub trait RecordCache: Send + Sync {
    fn peek(&self, key: &[u8]) -> Option<Bytes>;
}

/// Public key → last transport id it was seen behind.
pub trait PeerShardMapper: Send + Sync {
    fn last_known_peer_id(&self, public_key: &[u8]) -> Option<PeerId>;
}

/// Source of the epoch's validator key universe.
pub trait NodesCoordinator: Send + Sync {
    fn all_eligible_validators_keys(
        &self,
        epoch: u32,
    ) -> Result<HashMap<ShardId, Vec<Bytes>>, MembershipError>;
}

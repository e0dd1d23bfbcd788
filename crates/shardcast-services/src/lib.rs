//! shardcast-services — the data-exchange layer.
//!
//! Pull side: `ChunkedResolver` answers peers' record requests by key set or
//! by chunk of the epoch's validator keys. Push side: `TransactionBroadcaster`
//! time-windows outbound transactions and sends them per shard in
//! size-bounded packets. Collaborators (transport, admission, membership,
//! record storage) are reached through the traits in `interfaces`.

pub mod accumulator;
pub mod antiflood;
pub mod broadcaster;
pub mod cache;
pub mod chunking;
pub mod codec;
pub mod error;
pub mod fetcher;
pub mod interfaces;
pub mod loopback;
pub mod packer;
pub mod partition;
pub mod resolver;
pub mod throttle;

pub use accumulator::TimeAccumulator;
pub use antiflood::{PeerFloodGuard, TokenBucket};
pub use broadcaster::{BroadcasterArgs, OutboundItem, TransactionBroadcaster};
pub use cache::MemoryRecordCache;
pub use codec::{JsonMarshaller, Marshaller};
pub use error::{
    AdmissionError, BroadcastError, CodecError, MembershipError, ResolverError, SetupError,
    TransportError,
};
pub use fetcher::RecordFetcher;
pub use interfaces::{
    AntifloodHandler, Messenger, NodesCoordinator, PeerShardMapper, RecordCache, RequestSender,
    Throttler,
};
pub use loopback::{Delivery, LoopbackNetwork, LoopbackNode};
pub use packer::pack_data_in_chunks;
pub use resolver::{ChunkedResolver, ResolverArgs, MIN_RECORDS_PER_RESPONSE};
pub use throttle::{CountingThrottler, ThrottleSlot};

//! # counsel-realtime
//!
//! The stateful half of the substrate, reached only through durable stores:
//!
//! - **[`registry`]**: which connection is in which channel
//! - **[`fanout`]**: deliver one push to every member of a channel, pruning
//!   peers that are gone
//! - **[`bus`]**: at-least-once event propagation between invocations
//! - **[`cache`]**: tag-indexed read-through cache with bulk invalidation
//!
//! Nothing here keeps in-process state between invocations; every component
//! is a thin handle over a store or a transport.

#![deny(unsafe_code)]

pub mod bus;
pub mod cache;
pub mod channel;
pub mod fanout;
pub mod poster;
pub mod registry;

pub use bus::{
    BatchReport, EventCatalog, EventContext, EventHandler, EventListener, EventMessage, EventPublisher,
    EventTransport, ListenerWorker, MessageAdapter, QueueRecordAdapter, SqliteEventQueue, TransportRecord,
};
pub use cache::{CacheKey, CacheNamespace, CacheStore, CachedOptions, MemoryCacheStore, SqliteCacheStore, TaggedCache};
pub use channel::ChannelKind;
pub use fanout::{DeliveryReport, FanoutDispatcher};
pub use poster::{CallbackPoster, ConnectionPoster, PostError};
pub use registry::{ConnectionRecord, ConnectionRegistry, SqliteConnectionRegistry};

//! Cross-invocation event bus.
//!
//! Delivery is at-least-once. A publisher tags each message with its event
//! name and publish time as transport metadata; the listener routes on that
//! metadata before touching the body. Handlers may see the same message
//! more than once and must be safe to re-apply. For notification handlers
//! this means a user can occasionally receive the same push twice; push
//! frames carry the message id so clients can drop repeats.

pub mod adapter;
pub mod catalog;
pub mod listener;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod transport;
pub mod worker;

pub use adapter::{MessageAdapter, QueueRecordAdapter};
pub use catalog::EventCatalog;
pub use listener::{BatchReport, EventContext, EventHandler, EventListener};
pub use message::{EventMessage, TransportRecord};
pub use publisher::EventPublisher;
pub use queue::SqliteEventQueue;
pub use transport::EventTransport;
pub use worker::ListenerWorker;

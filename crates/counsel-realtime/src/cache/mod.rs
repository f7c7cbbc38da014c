//! Tag-indexed cache.
//!
//! Values are JSON strings under namespaced keys (`profile:<id>`). Each tag
//! has an index set of member keys stored under `tags:<tag>`, a namespace no
//! value key can collide with. Invalidating a tag deletes every member value
//! and then the index itself; repeating it is a no-op.

pub mod keys;
pub mod store;
pub mod tagged;

pub use keys::{CacheKey, CacheNamespace};
pub use store::{CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use tagged::{CachedOptions, TaggedCache};

//! Keyed cache for server-owned entities read from many places.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Caches entities under a fixed key with the time they were fetched
//! - Serves fresh entries without touching the network
//! - Supports in-place patches (optimistic updates) as one atomic step
//! - Provides basic offline mode (serve stale cache when network unavailable)

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{
  CacheStorage, CachedEntity, MemoryStorage, NoopStorage, SqliteStorage, StorageBackend,
};
pub use traits::{CacheResult, CacheSource, Cacheable};

/// The cache type the rest of the crate shares.
pub type QueryCache = CacheLayer<StorageBackend>;

//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::{CacheStorage, CachedEntity};
use super::traits::{CacheResult, Cacheable};

/// Keyed cache over a storage backend.
///
/// Reads are cache-first with a stale time; writes come either from an
/// authoritative fetch (which resets the entry) or from an in-place update
/// (which patches the entry without claiming freshness).
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn is_stale<T>(&self, cached: &CachedEntity<T>) -> bool {
    cached.invalidated || Utc::now() - cached.cached_at > self.stale_time
  }

  /// Fetch a single entity with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from network
  /// 3. On network failure, return stale cache (offline mode)
  /// 4. Update cache with new data
  pub async fn fetch_one<T, E, F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<T>, E>
  where
    T: Cacheable,
    E: From<color_eyre::Report> + std::fmt::Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    // Check cache first
    if let Some(cached) = self.storage.get_entity::<T>(key)? {
      if !self.is_stale(&cached) {
        return Ok(CacheResult::from_cache(cached.entity, cached.cached_at));
      }

      match fetcher().await {
        Ok(data) => {
          self.storage.store_entity(key, &data)?;
          Ok(CacheResult::from_network(data))
        }
        Err(err) => {
          // Network failed, return stale cache (offline mode)
          warn!(key, "serving stale cache: {}", err);
          Ok(CacheResult::offline(cached.entity, cached.cached_at))
        }
      }
    } else {
      // No cache, must fetch from network
      let data = fetcher().await?;
      self.storage.store_entity(key, &data)?;
      Ok(CacheResult::from_network(data))
    }
  }

  /// Fetch from the network unconditionally and overwrite the cache.
  ///
  /// Whatever was cached, including locally patched values, is replaced by the
  /// server's answer.
  pub async fn refresh<T, E, F, Fut>(&self, key: &str, fetcher: F) -> Result<T, E>
  where
    T: Cacheable,
    E: From<color_eyre::Report>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let data = fetcher().await?;
    self.storage.store_entity(key, &data)?;
    debug!(key, "cache refreshed from network");
    Ok(data)
  }

  /// Cached value regardless of staleness.
  pub fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>> {
    Ok(self.storage.get_entity::<T>(key)?.map(|c| c.entity))
  }

  /// Write a value as if it had just been fetched.
  pub fn set<T: Cacheable>(&self, key: &str, value: &T) -> Result<()> {
    self.storage.store_entity(key, value)
  }

  /// Apply a pure transform to the cached value in one step.
  ///
  /// Returns `None` without calling `f` when nothing is cached.
  pub fn update<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
  where
    T: Cacheable,
    F: FnOnce(T) -> T,
  {
    self.storage.update_entity(key, f)
  }

  /// Mark the entry stale so the next cache-first read goes to the network.
  pub fn invalidate<T: Cacheable>(&self, key: &str) -> Result<()> {
    self.storage.invalidate::<T>(key)
  }

  /// Drop every entry.
  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      stale_time: self.stale_time,
    }
  }
}

//! Marketplace domain: offers, favorites, credits and the user profile.
//!
//! [`Marketplace`] is the composition root. It owns the API handle, one
//! [`RefetchBus`] per domain and the shared profile cache, and hands out the
//! per-screen units (queries, mutations, the credit consumer, the profile
//! store) already wired to them.

pub mod api;
pub mod api_types;
pub mod client;
pub mod credits;
pub mod favorites;
pub mod offers;
pub mod profile;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::bus::{Domain, RefetchBus};
use crate::cache::{MemoryStorage, QueryCache, SqliteStorage, StorageBackend};
use crate::config::Config;
use crate::retry::RetryPolicy;

pub use api::{ApiResult, MarketApi};
pub use client::MarketClient;
pub use credits::{CreditConsumer, CreditState};
pub use favorites::find_favorite;
pub use profile::{ProfileStore, PROFILE_KEY};
pub use types::*;

/// Shared handles every unit of the marketplace is built from.
#[derive(Clone)]
pub struct Marketplace {
  api: Arc<dyn MarketApi>,
  offers_bus: RefetchBus,
  favorites_bus: RefetchBus,
  cache: QueryCache,
  retry: RetryPolicy,
}

impl Marketplace {
  pub fn new(api: Arc<dyn MarketApi>, cache: QueryCache) -> Self {
    Self {
      api,
      offers_bus: RefetchBus::new(Domain::Offers),
      favorites_bus: RefetchBus::new(Domain::Favorites),
      cache,
      retry: RetryPolicy::default(),
    }
  }

  /// Retry policy of profile reads.
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Build the HTTP client and cache described by `config`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let client = MarketClient::new(config)?;

    let storage = if config.cache.persist {
      let path = match &config.cache.path {
        Some(path) => path.clone(),
        None => SqliteStorage::default_path()?,
      };
      info!(path = %path.display(), "using persistent cache");
      StorageBackend::Sqlite(SqliteStorage::open_at(&path)?)
    } else {
      StorageBackend::Memory(MemoryStorage::new())
    };
    let cache = QueryCache::new(storage).with_stale_time(config.cache.stale_time());

    let retry = RetryPolicy::default().with_retries(config.api.retries);

    Ok(Self::new(Arc::new(client), cache).with_retry(retry))
  }

  pub fn api(&self) -> &Arc<dyn MarketApi> {
    &self.api
  }

  /// The refetch bus of `domain`.
  pub fn bus(&self, domain: Domain) -> &RefetchBus {
    match domain {
      Domain::Offers => &self.offers_bus,
      Domain::Favorites => &self.favorites_bus,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Drop every cached entry. Called on sign-in and sign-out so one user's
  /// profile never shows up for another.
  pub fn clear_session(&self) -> Result<()> {
    self.cache.clear()?;
    info!("session cache cleared");
    Ok(())
  }
}

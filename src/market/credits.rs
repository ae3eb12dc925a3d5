//! Credit consumption with an optimistic patch of the cached profile.
//!
//! Spending a credit does not go through a refetch bus. On success the cached
//! profile's balance is decremented in place, in one storage-level
//! read-modify-write, before `consume_credit` returns. The server's absolute
//! value wins again on the next authoritative profile read.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::api::MarketApi;
use super::profile::PROFILE_KEY;
use super::types::Profile;
use super::Marketplace;
use crate::cache::QueryCache;
use crate::error::NormalizedError;

/// Confirmation used when the backend sends no message of its own.
pub const CREDIT_USED_MESSAGE: &str = "Credit used successfully";

/// Observable state of a [`CreditConsumer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreditState {
  pub loading: bool,
  pub error: Option<NormalizedError>,
  pub success: bool,
  /// Confirmation message of the last successful consumption
  pub message: Option<String>,
}

type SuccessFn = Box<dyn Fn() + Send + Sync>;
type ErrorFn = Box<dyn Fn(&str) + Send + Sync>;

pub struct CreditConsumer {
  api: Arc<dyn MarketApi>,
  cache: QueryCache,
  state: watch::Sender<CreditState>,
  on_success: Option<SuccessFn>,
  on_error: Option<ErrorFn>,
}

impl CreditConsumer {
  pub fn new(api: Arc<dyn MarketApi>, cache: QueryCache) -> Self {
    let (state, _) = watch::channel(CreditState::default());
    Self {
      api,
      cache,
      state,
      on_success: None,
      on_error: None,
    }
  }

  /// Called after a successful consumption, once the cache is patched.
  pub fn on_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
    self.on_success = Some(Box::new(f));
    self
  }

  /// Called with the normalized message of any failure.
  pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Box::new(f));
    self
  }

  /// Spend one credit of `owner_id`.
  ///
  /// An empty id fails locally without any remote call. On remote failure the
  /// cached balance is left untouched.
  pub async fn consume_credit(&self, owner_id: &str) -> Result<(), NormalizedError> {
    if owner_id.trim().is_empty() {
      return Err(self.fail(NormalizedError::validation("Client id is required")));
    }

    self.state.send_modify(|s| {
      s.loading = true;
      s.error = None;
      s.success = false;
      s.message = None;
    });

    match self.api.consume_credit(owner_id).await {
      Ok(receipt) => {
        self.decrement_cached_credits();
        info!(owner_id, "credit consumed");
        self.state.send_modify(|s| {
          s.loading = false;
          s.success = true;
          s.message = Some(receipt.message);
        });
        if let Some(f) = &self.on_success {
          f();
        }
        Ok(())
      }
      Err(err) => Err(self.fail(err)),
    }
  }

  fn decrement_cached_credits(&self) {
    let patched = self.cache.update(PROFILE_KEY, |mut profile: Profile| {
      profile.credits = Some(profile.credits.unwrap_or(0) - 1);
      profile
    });
    match patched {
      Ok(Some(profile)) => debug!(credits = ?profile.credits, "cached credits decremented"),
      Ok(None) => debug!("no cached profile to patch"),
      // The remote write committed; the next profile read reconciles.
      Err(err) => warn!("failed to patch cached credits: {}", err),
    }
  }

  fn fail(&self, err: NormalizedError) -> NormalizedError {
    warn!(status = ?err.status, "credit consumption failed: {}", err.message);
    self.state.send_modify(|s| {
      s.loading = false;
      s.success = false;
      s.error = Some(err.clone());
    });
    if let Some(f) = &self.on_error {
      f(&err.message);
    }
    err
  }

  /// Clear loading, error, success and message. The cache is not touched.
  pub fn reset_state(&self) {
    self.state.send_replace(CreditState::default());
  }

  pub fn snapshot(&self) -> CreditState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<CreditState> {
    self.state.subscribe()
  }

  pub fn is_loading(&self) -> bool {
    self.state.borrow().loading
  }
}

impl fmt::Debug for CreditConsumer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CreditConsumer")
      .field("state", &*self.state.borrow())
      .finish_non_exhaustive()
  }
}

impl Marketplace {
  pub fn credit_consumer(&self) -> CreditConsumer {
    CreditConsumer::new(Arc::clone(&self.api), self.cache.clone())
  }
}

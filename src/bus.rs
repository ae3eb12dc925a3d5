//! Per-domain refetch bus.
//!
//! List queries register a refetch callback on mount; a successful mutation
//! broadcasts on its domain's bus, which re-runs every registered callback
//! concurrently. Each domain owns its own [`RefetchBus`] instance, handed to
//! queries and mutations by reference.

use color_eyre::Result;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tracing::{debug, warn};

/// A resource family with its own broadcast list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
  Offers,
  Favorites,
}

impl fmt::Display for Domain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Domain::Offers => f.write_str("offers"),
      Domain::Favorites => f.write_str("favorites"),
    }
  }
}

/// Identity of whoever registered a callback (usually one query instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
  /// Allocate a fresh, process-unique owner id.
  pub fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    OwnerId(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A registered zero-argument async callback.
type RefetchFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

struct Entry {
  owner: OwnerId,
  token: u64,
  callback: RefetchFn,
}

#[derive(Default)]
struct BusInner {
  entries: Mutex<Vec<Entry>>,
  next_token: AtomicU64,
}

impl BusInner {
  fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
    // Entries stay consistent even if a holder panicked mid-push.
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn remove(&self, token: u64) -> bool {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|e| e.token != token);
    entries.len() != before
  }
}

/// Outcome of a broadcast where every callback succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
  pub domain: Domain,
  pub notified: usize,
}

/// Raised when at least one callback of a broadcast failed. The others still
/// ran to completion.
#[derive(Debug, Error)]
#[error("{failed} of {total} {domain} refetches failed: {}", .messages.join("; "))]
pub struct BroadcastError {
  pub domain: Domain,
  pub total: usize,
  pub failed: usize,
  pub messages: Vec<String>,
}

/// Publish/subscribe table of refetch callbacks for one domain.
#[derive(Clone)]
pub struct RefetchBus {
  domain: Domain,
  inner: Arc<BusInner>,
}

impl RefetchBus {
  pub fn new(domain: Domain) -> Self {
    Self {
      domain,
      inner: Arc::new(BusInner::default()),
    }
  }

  pub fn domain(&self) -> Domain {
    self.domain
  }

  /// Number of currently registered callbacks.
  pub fn len(&self) -> usize {
    self.inner.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Register `callback` on behalf of `owner`.
  ///
  /// Registering again for the same owner replaces its callback in place, so
  /// an owner is never notified twice per broadcast. The returned guard
  /// removes the entry when dropped; a guard superseded by a later
  /// registration of the same owner does nothing on drop.
  pub fn register<F, Fut>(&self, owner: OwnerId, callback: F) -> Subscription
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
    let callback: RefetchFn = Arc::new(move || Box::pin(callback()));

    let mut entries = self.inner.entries();
    match entries.iter_mut().find(|e| e.owner == owner) {
      Some(existing) => {
        existing.token = token;
        existing.callback = callback;
        debug!(domain = %self.domain, ?owner, "replaced refetch registration");
      }
      None => {
        entries.push(Entry {
          owner,
          token,
          callback,
        });
        debug!(domain = %self.domain, ?owner, registered = entries.len(), "registered refetch");
      }
    }

    Subscription {
      domain: self.domain,
      inner: Arc::downgrade(&self.inner),
      token,
    }
  }

  /// Run every registered callback concurrently and wait for all of them.
  ///
  /// Callbacks registered or removed while the broadcast is running are not
  /// affected; the set is snapshotted up front. A failing callback never
  /// prevents the others from running, but any failure is reported.
  pub async fn broadcast(&self) -> std::result::Result<BroadcastReport, BroadcastError> {
    let callbacks: Vec<RefetchFn> = self
      .inner
      .entries()
      .iter()
      .map(|e| Arc::clone(&e.callback))
      .collect();

    let total = callbacks.len();
    debug!(domain = %self.domain, total, "broadcasting refetch");

    let outcomes = join_all(callbacks.iter().map(|cb| cb())).await;

    let messages: Vec<String> = outcomes
      .into_iter()
      .filter_map(|outcome| outcome.err().map(|e| e.to_string()))
      .collect();

    if messages.is_empty() {
      Ok(BroadcastReport {
        domain: self.domain,
        notified: total,
      })
    } else {
      warn!(domain = %self.domain, failed = messages.len(), total, "refetch broadcast had failures");
      Err(BroadcastError {
        domain: self.domain,
        total,
        failed: messages.len(),
        messages,
      })
    }
  }
}

impl fmt::Debug for RefetchBus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefetchBus")
      .field("domain", &self.domain)
      .field("registered", &self.len())
      .finish()
  }
}

/// Guard for one bus registration. Dropping it unregisters the callback.
#[must_use = "dropping the subscription unregisters the callback immediately"]
pub struct Subscription {
  domain: Domain,
  inner: Weak<BusInner>,
  token: u64,
}

impl Subscription {
  /// Unregister now. Equivalent to dropping the guard.
  pub fn unregister(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.inner.upgrade() {
      if inner.remove(self.token) {
        debug!(domain = %self.domain, "unregistered refetch");
      }
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("domain", &self.domain)
      .field("token", &self.token)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;
  use tokio::sync::Barrier;

  fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() -> BoxFuture + Send + Sync + 'static {
    let counter = counter.clone();
    move || {
      let counter = counter.clone();
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      })
    }
  }

  #[tokio::test]
  async fn test_broadcast_invokes_registered_callbacks() {
    let bus = RefetchBus::new(Domain::Offers);
    let counter = Arc::new(AtomicUsize::new(0));

    let _a = bus.register(OwnerId::next(), counting(&counter));
    let _b = bus.register(OwnerId::next(), counting(&counter));

    let report = bus.broadcast().await.unwrap();
    assert_eq!(report.notified, 2);
    assert_eq!(report.domain, Domain::Offers);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_unregistered_callback_is_not_invoked() {
    let bus = RefetchBus::new(Domain::Favorites);
    let counter = Arc::new(AtomicUsize::new(0));

    let kept = bus.register(OwnerId::next(), counting(&counter));
    let dropped = bus.register(OwnerId::next(), counting(&counter));
    assert_eq!(bus.len(), 2);

    dropped.unregister();
    assert_eq!(bus.len(), 1);

    bus.broadcast().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    drop(kept);
    assert!(bus.is_empty());
    let report = bus.broadcast().await.unwrap();
    assert_eq!(report.notified, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_reregistering_same_owner_is_idempotent() {
    let bus = RefetchBus::new(Domain::Offers);
    let counter = Arc::new(AtomicUsize::new(0));
    let owner = OwnerId::next();

    let first = bus.register(owner, counting(&counter));
    let second = bus.register(owner, counting(&counter));
    assert_eq!(bus.len(), 1);

    bus.broadcast().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // The superseded guard must not remove the live registration.
    drop(first);
    assert_eq!(bus.len(), 1);

    drop(second);
    assert!(bus.is_empty());
  }

  #[tokio::test]
  async fn test_broadcast_runs_callbacks_concurrently() {
    let bus = RefetchBus::new(Domain::Offers);
    let barrier = Arc::new(Barrier::new(2));

    let mut subs = Vec::new();
    for _ in 0..2 {
      let barrier = barrier.clone();
      subs.push(bus.register(OwnerId::next(), move || {
        let barrier = barrier.clone();
        async move {
          // Only completes if both callbacks are in flight at once.
          barrier.wait().await;
          Ok(())
        }
      }));
    }

    let result = tokio::time::timeout(Duration::from_secs(2), bus.broadcast()).await;
    assert!(result.is_ok(), "callbacks ran sequentially");
  }

  #[tokio::test]
  async fn test_failure_does_not_suppress_other_callbacks() {
    let bus = RefetchBus::new(Domain::Favorites);
    let counter = Arc::new(AtomicUsize::new(0));

    let _ok1 = bus.register(OwnerId::next(), counting(&counter));
    let _bad = bus.register(OwnerId::next(), || async { Err(eyre!("screen gone")) });
    let _ok2 = bus.register(OwnerId::next(), counting(&counter));

    let err = bus.broadcast().await.unwrap_err();
    assert_eq!(err.total, 3);
    assert_eq!(err.failed, 1);
    assert!(err.to_string().contains("screen gone"));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_domains_are_independent() {
    let offers = RefetchBus::new(Domain::Offers);
    let favorites = RefetchBus::new(Domain::Favorites);
    let counter = Arc::new(AtomicUsize::new(0));

    let _sub = favorites.register(OwnerId::next(), counting(&counter));
    offers.broadcast().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_guard_outliving_bus_is_harmless() {
    let bus = RefetchBus::new(Domain::Offers);
    let sub = bus.register(OwnerId::next(), || async { Ok(()) });
    drop(bus);
    drop(sub);
  }
}

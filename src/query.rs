//! Async query abstraction for per-screen data fetching.
//!
//! Inspired by TanStack Query, a `Query<T, P>` owns the fetch state of one
//! resource for one screen: the last data, whether a fetch is in flight and the
//! last error message. The fetcher is called with the query's identifying
//! parameter (`()` for lists, an id for detail screens).
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let offers = Query::mount("active offers", (), move |()| {
//!     let api = api.clone();
//!     async move { api.active_offers().await }
//! })
//! .subscribe_to(&offers_bus);
//!
//! // Re-render whenever the state changes
//! let mut rx = offers.subscribe();
//! while rx.changed().await.is_ok() {
//!     render(&rx.borrow());
//! }
//! ```
//!
//! Every fetch takes a ticket from a per-query sequence. A completion is only
//! applied when its ticket is still the newest and the query is still alive,
//! so a slow response can never overwrite a newer one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bus::{OwnerId, RefetchBus, Subscription};
use crate::error::NormalizedError;

/// Snapshot of a query's fetch state.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  /// Last successfully fetched data
  pub data: Option<T>,
  /// A fetch is in flight
  pub loading: bool,
  /// Normalized message of the last failed fetch
  pub error: Option<String>,
  /// When `data` was fetched
  pub fetched_at: Option<Instant>,
}

impl<T> QueryState<T> {
  fn loading() -> Self {
    Self {
      data: None,
      loading: true,
      error: None,
      fetched_at: None,
    }
  }

  pub fn is_success(&self) -> bool {
    !self.loading && self.error.is_none() && self.data.is_some()
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

impl<T> QueryState<Vec<T>> {
  /// List items, empty until the first successful fetch.
  pub fn items(&self) -> &[T] {
    self.data.as_deref().unwrap_or(&[])
  }
}

/// A boxed future that returns a fetch result
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, NormalizedError>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T, P> = Box<dyn Fn(P) -> BoxFuture<T> + Send + Sync>;

struct Shared<T, P> {
  label: &'static str,
  fetcher: FetcherFn<T, P>,
  param: Mutex<P>,
  seq: AtomicU64,
  mounted: AtomicBool,
  state: watch::Sender<QueryState<T>>,
}

impl<T, P> Shared<T, P>
where
  T: Send + Sync + 'static,
  P: Clone + Send + 'static,
{
  fn current_param(&self) -> P {
    self.param.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn is_current(&self, ticket: u64) -> bool {
    self.mounted.load(Ordering::SeqCst) && self.seq.load(Ordering::SeqCst) == ticket
  }

  /// One full fetch cycle: mark loading, call the fetcher, apply the result
  /// if this cycle is still the newest.
  async fn run(&self) {
    let ticket = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
    let param = self.current_param();

    self.state.send_modify(|s| {
      s.loading = true;
      s.error = None;
    });
    debug!(query = self.label, ticket, "fetch started");

    let result = (self.fetcher)(param).await;

    if !self.is_current(ticket) {
      debug!(query = self.label, ticket, "discarding superseded response");
      return;
    }

    self.state.send_modify(|s| {
      match result {
        Ok(data) => {
          s.data = Some(data);
          s.fetched_at = Some(Instant::now());
        }
        Err(err) => {
          warn!(query = self.label, status = ?err.status, "fetch failed: {}", err.message);
          s.error = Some(err.message);
        }
      }
      s.loading = false;
    });
    debug!(query = self.label, ticket, "fetch settled");
  }
}

/// Per-screen fetch unit.
///
/// Dropping the query unmounts it: its bus registration (if any) is removed and
/// responses still in flight are discarded.
pub struct Query<T, P = ()> {
  shared: Arc<Shared<T, P>>,
  owner: OwnerId,
  stale_time: Duration,
  subscription: Option<Subscription>,
}

impl<T, P> Query<T, P>
where
  T: Send + Sync + 'static,
  P: Clone + PartialEq + Send + Sync + 'static,
{
  /// Create a query and immediately start its first fetch.
  ///
  /// Must be called from within a tokio runtime.
  pub fn mount<F, Fut>(label: &'static str, param: P, fetcher: F) -> Self
  where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, NormalizedError>> + Send + 'static,
  {
    let (state, _) = watch::channel(QueryState::loading());
    let shared = Arc::new(Shared {
      label,
      fetcher: Box::new(move |p| Box::pin(fetcher(p))),
      param: Mutex::new(param),
      seq: AtomicU64::new(0),
      mounted: AtomicBool::new(true),
      state,
    });

    let query = Self {
      shared,
      owner: OwnerId::next(),
      stale_time: Duration::from_secs(60), // Default 1 minute
      subscription: None,
    };
    query.fetch();
    query
  }

  /// Register this query's refetch with `bus` for as long as the query lives.
  ///
  /// Calling it again (on the same or another bus) replaces the previous
  /// registration.
  pub fn subscribe_to(mut self, bus: &RefetchBus) -> Self {
    let weak = Arc::downgrade(&self.shared);
    self.subscription = Some(bus.register(self.owner, move || {
      let weak = weak.clone();
      async move {
        if let Some(shared) = weak.upgrade() {
          shared.run().await;
        }
        Ok(())
      }
    }));
    self
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Start a fetch in the background.
  pub fn fetch(&self) {
    let shared = Arc::clone(&self.shared);
    tokio::spawn(async move { shared.run().await });
  }

  /// Run a fetch and wait for it. Concurrent calls are independent; only the
  /// newest one's result is kept.
  pub async fn refetch(&self) {
    self.shared.run().await;
  }

  /// Change the identifying parameter, refetching when it differs.
  pub async fn set_param(&self, param: P) {
    {
      let mut current = self.shared.param.lock().unwrap_or_else(|e| e.into_inner());
      if *current == param {
        return;
      }
      *current = param;
    }
    self.refetch().await;
  }

  pub fn param(&self) -> P {
    self.shared.current_param()
  }

  /// Whether this query is registered with a refetch bus.
  pub fn is_subscribed(&self) -> bool {
    self.subscription.is_some()
  }

  /// Receiver notified on every state change.
  pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
    self.shared.state.subscribe()
  }

  pub fn is_loading(&self) -> bool {
    self.shared.state.borrow().loading
  }

  pub fn error(&self) -> Option<String> {
    self.shared.state.borrow().error.clone()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    let state = self.shared.state.borrow();
    match state.fetched_at {
      Some(t) if state.data.is_some() => t.elapsed() > self.stale_time,
      _ => false,
    }
  }
}

impl<T, P> Query<T, P>
where
  T: Clone + Send + Sync + 'static,
  P: Clone + PartialEq + Send + Sync + 'static,
{
  pub fn snapshot(&self) -> QueryState<T> {
    self.shared.state.borrow().clone()
  }

  pub fn data(&self) -> Option<T> {
    self.shared.state.borrow().data.clone()
  }

  /// Wait until no fetch is in flight and return the resulting state.
  pub async fn settled(&self) -> QueryState<T> {
    let mut rx = self.subscribe();
    let state = match rx.wait_for(|s| !s.loading).await {
      Ok(state) => state.clone(),
      // The sender lives in `self`, so the channel cannot close while we wait.
      Err(_) => self.snapshot(),
    };
    state
  }
}

impl<T, P> Query<Vec<T>, P>
where
  T: Clone + Send + Sync + 'static,
  P: Clone + PartialEq + Send + Sync + 'static,
{
  /// List items, empty until the first successful fetch.
  pub fn items(&self) -> Vec<T> {
    self.shared.state.borrow().items().to_vec()
  }
}

impl<T, P> Drop for Query<T, P> {
  fn drop(&mut self) {
    self.shared.mounted.store(false, Ordering::SeqCst);
    if self.subscription.take().is_some() {
      debug!(query = self.shared.label, "query unmounted");
    }
  }
}

impl<T: fmt::Debug, P: fmt::Debug> fmt::Debug for Query<T, P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Query")
      .field("label", &self.shared.label)
      .field("state", &*self.shared.state.borrow())
      .field("stale_time", &self.stale_time)
      .field("subscribed", &self.subscription.is_some())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bus::Domain;
  use crate::error::RawError;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;

  #[tokio::test]
  async fn test_query_success() {
    let query = Query::mount("numbers", (), |()| async { Ok(vec![1, 2, 3]) });
    assert!(query.is_loading());

    let state = query.settled().await;
    assert!(state.is_success());
    assert_eq!(query.items(), vec![1, 2, 3]);
    assert!(query.error().is_none());
  }

  #[tokio::test]
  async fn test_query_error_is_stored_not_raised() {
    let query: Query<Vec<i32>> = Query::mount("failing", (), |()| async {
      Err(NormalizedError::from(RawError::Payload(json!({
        "message": ["Token expirado"],
        "statusCode": 401
      }))))
    });

    let state = query.settled().await;
    assert!(!state.loading);
    assert_eq!(state.error.as_deref(), Some("Token expirado"));
    assert!(query.items().is_empty());
  }

  #[tokio::test]
  async fn test_refetch_clears_previous_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let query = Query::mount("flaky", (), move |()| {
      let n = calls_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err(NormalizedError::validation("first call fails"))
        } else {
          Ok(n)
        }
      }
    });

    assert!(query.settled().await.is_error());
    query.refetch().await;
    let state = query.snapshot();
    assert!(state.error.is_none());
    assert_eq!(state.data, Some(1));
  }

  #[tokio::test]
  async fn test_superseded_response_is_discarded() {
    // Param "slow" resolves after "fast"; the late answer must not win.
    let query = Query::mount("detail", "slow".to_string(), |id: String| async move {
      if id == "slow" {
        tokio::time::sleep(Duration::from_millis(80)).await;
      }
      Ok(id)
    });
    // Let the initial "slow" fetch start before switching.
    tokio::task::yield_now().await;

    query.set_param("fast".to_string()).await;
    assert_eq!(query.data().as_deref(), Some("fast"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let state = query.snapshot();
    assert_eq!(state.data.as_deref(), Some("fast"));
    assert!(!state.loading);
  }

  #[tokio::test]
  async fn test_set_param_with_same_value_does_not_refetch() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let query = Query::mount("detail", "o1".to_string(), move |id: String| {
      calls_clone.fetch_add(1, Ordering::SeqCst);
      async move { Ok(id) }
    });
    query.settled().await;

    query.set_param("o1".to_string()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    query.set_param("o2".to_string()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(query.param(), "o2");
  }

  #[tokio::test]
  async fn test_subscribed_query_refetches_on_broadcast() {
    let bus = RefetchBus::new(Domain::Offers);
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let query = Query::mount("counter", (), move |()| {
      let n = counter_clone.fetch_add(1, Ordering::SeqCst);
      async move { Ok(n) }
    })
    .subscribe_to(&bus);
    assert!(query.is_subscribed());
    query.settled().await;

    bus.broadcast().await.unwrap();
    assert_eq!(query.data(), Some(1));
  }

  #[tokio::test]
  async fn test_dropped_query_unregisters() {
    let bus = RefetchBus::new(Domain::Favorites);
    let query = Query::mount("gone", (), |()| async { Ok(0u8) }).subscribe_to(&bus);
    assert_eq!(bus.len(), 1);

    drop(query);
    assert!(bus.is_empty());
    assert_eq!(bus.broadcast().await.unwrap().notified, 0);
  }

  #[tokio::test]
  async fn test_watchers_see_state_changes() {
    let query = Query::mount("watched", (), |()| async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      Ok("ready")
    });
    let mut rx = query.subscribe();

    rx.changed().await.unwrap();
    let state = rx.wait_for(|s| !s.loading).await.unwrap().clone();
    assert_eq!(state.data, Some("ready"));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let query = Query::mount("stale", (), |()| async { Ok(42) }).with_stale_time(Duration::ZERO);
    assert!(!query.is_stale());

    query.settled().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(query.is_stale());
  }
}

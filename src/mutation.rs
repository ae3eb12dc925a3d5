//! Write operations that keep peer queries coherent.
//!
//! A [`Mutation`] wraps one remote write. After the write succeeds it
//! broadcasts on its domain's [`RefetchBus`] and waits for the peers to finish
//! refetching before handing the result back, so by the time the caller acts on
//! success (navigates away, shows a toast) every mounted list is fresh.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bus::RefetchBus;
use crate::error::NormalizedError;

/// Observable state of a mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
  /// A write is pending
  pub loading: bool,
  /// Normalized error of the last failed write
  pub error: Option<NormalizedError>,
}

type BoxFuture<O> = Pin<Box<dyn Future<Output = Result<O, NormalizedError>> + Send>>;

type OperationFn<I, O> = Box<dyn Fn(I) -> BoxFuture<O> + Send + Sync>;

/// One remote write plus its loading/error state.
///
/// Overlapping `execute` calls are allowed; `loading` stays set until the last
/// of them settles.
pub struct Mutation<I, O> {
  label: &'static str,
  operation: OperationFn<I, O>,
  bus: Option<RefetchBus>,
  state: watch::Sender<MutationState>,
  /// Writes started and not yet settled
  pending: AtomicUsize,
}

impl<I, O> Mutation<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  /// Create a mutation that does not notify any peers.
  pub fn new<F, Fut>(label: &'static str, operation: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, NormalizedError>> + Send + 'static,
  {
    let (state, _) = watch::channel(MutationState::default());
    Self {
      label,
      operation: Box::new(move |input| Box::pin(operation(input))),
      bus: None,
      state,
      pending: AtomicUsize::new(0),
    }
  }

  /// Broadcast on `bus` after every successful write.
  pub fn broadcasting_to(mut self, bus: &RefetchBus) -> Self {
    self.bus = Some(bus.clone());
    self
  }

  /// Run the write.
  ///
  /// On success the domain bus is broadcast before returning; a failed
  /// broadcast is logged but does not fail the write, which already committed
  /// server-side. On failure the normalized error is stored and returned.
  pub async fn execute(&self, input: I) -> Result<O, NormalizedError> {
    self.state.send_modify(|s| {
      self.pending.fetch_add(1, Ordering::SeqCst);
      s.loading = true;
      s.error = None;
    });
    debug!(mutation = self.label, "mutation pending");

    match (self.operation)(input).await {
      Ok(output) => {
        if let Some(bus) = &self.bus {
          match bus.broadcast().await {
            Ok(report) => {
              debug!(mutation = self.label, notified = report.notified, "peers refetched")
            }
            Err(err) => warn!(mutation = self.label, "refetch after write failed: {}", err),
          }
        }
        self.state.send_modify(|s| s.loading = self.settle_one());
        Ok(output)
      }
      Err(err) => {
        warn!(mutation = self.label, status = ?err.status, "mutation failed: {}", err.message);
        self.state.send_modify(|s| {
          s.loading = self.settle_one();
          s.error = Some(err.clone());
        });
        Err(err)
      }
    }
  }

  /// Count one write as settled; true while others are still pending.
  fn settle_one(&self) -> bool {
    self.pending.fetch_sub(1, Ordering::SeqCst) > 1
  }

  pub fn is_loading(&self) -> bool {
    self.state.borrow().loading
  }

  pub fn error(&self) -> Option<NormalizedError> {
    self.state.borrow().error.clone()
  }

  pub fn snapshot(&self) -> MutationState {
    self.state.borrow().clone()
  }

  /// Receiver notified on every state change.
  pub fn subscribe(&self) -> watch::Receiver<MutationState> {
    self.state.subscribe()
  }

  /// Forget the last error.
  pub fn reset(&self) {
    self.state.send_modify(|s| s.error = None);
  }
}

impl<I, O> fmt::Debug for Mutation<I, O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Mutation")
      .field("label", &self.label)
      .field("state", &*self.state.borrow())
      .field("bus", &self.bus)
      .finish_non_exhaustive()
  }
}

//! Retry with exponential backoff for idempotent reads.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::NormalizedError;

/// How often a failed read is retried and how long to wait in between.
///
/// The wait before retry `n` (0-based) is `base_delay * 2^n`, capped at
/// `max_delay`. Local validation failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retries: 2,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  /// Fail on the first error.
  pub fn none() -> Self {
    Self {
      retries: 0,
      ..Self::default()
    }
  }

  /// Retry without waiting.
  pub fn immediate(retries: u32) -> Self {
    Self {
      retries,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
    }
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  /// Wait before retry number `attempt` (0-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Run `op` until it succeeds or the retries are spent; returns the last error.
  pub async fn run<T, F, Fut>(&self, label: &'static str, mut op: F) -> Result<T, NormalizedError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NormalizedError>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if attempt < self.retries && !err.is_validation() => {
          let delay = self.delay(attempt);
          attempt += 1;
          warn!(
            op = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying after failure: {}",
            err.message
          );
          tokio::time::sleep(delay).await;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy {
      retries: 5,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(3),
    };
    assert_eq!(policy.delay(0), Duration::from_millis(500));
    assert_eq!(policy.delay(1), Duration::from_secs(1));
    assert_eq!(policy.delay(2), Duration::from_secs(2));
    assert_eq!(policy.delay(3), Duration::from_secs(3));
    assert_eq!(policy.delay(40), Duration::from_secs(3));
  }

  #[tokio::test]
  async fn test_succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result = RetryPolicy::immediate(2)
      .run("flaky", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n < 2 {
            Err(NormalizedError::from(crate::error::RawError::Unknown))
          } else {
            Ok(n)
          }
        }
      })
      .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_gives_up_after_retries() {
    let calls = AtomicU32::new(0);
    let err = RetryPolicy::immediate(2)
      .run("down", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(NormalizedError::from(crate::error::RawError::Unknown)) }
      })
      .await
      .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!err.message.is_empty());
  }

  #[tokio::test]
  async fn test_validation_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result = RetryPolicy::immediate(3)
      .run("invalid", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(NormalizedError::validation("missing id")) }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}

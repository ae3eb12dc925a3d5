//! Error and success normalization.
//!
//! Every failure that crosses a fetch, mutation or credit boundary is funneled
//! through [`normalize`], which turns whatever shape the backend or transport
//! produced into a [`NormalizedError`] whose `message` is always a non-empty,
//! human-readable string.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Message used when no other source yields a usable string.
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Message used when a success payload carries no message of its own.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Operation completed successfully";

// ============================================================================
// Raw failure shapes
// ============================================================================

/// A failure as it was produced, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawError {
  /// A response was received; `body` is the backend payload wrapped by the
  /// transport envelope.
  Response { status: u16, body: Value },
  /// A bare backend payload with no envelope around it.
  Payload(Value),
  /// No usable response: connection failures, timeouts, undecodable bodies.
  Transport {
    message: String,
    status: Option<u16>,
  },
  /// Rejected locally before any remote call.
  Validation(String),
  /// A local failure unrelated to the request, such as the cache store.
  Internal(String),
  /// An error that already went through [`normalize`].
  Normalized(Box<NormalizedError>),
  /// Nothing is known about the failure.
  Unknown,
}

impl RawError {
  fn payload(&self) -> Option<&Value> {
    match self {
      RawError::Response { body, .. } => Some(body),
      RawError::Payload(value) => Some(value),
      _ => None,
    }
  }

  /// The generic message a failure exposes regardless of its payload.
  fn generic_message(&self) -> Option<String> {
    match self {
      RawError::Response { status, .. } => {
        Some(format!("Request failed with status code {}", status))
      }
      RawError::Transport { message, .. } => Some(message.clone()),
      RawError::Validation(message) | RawError::Internal(message) => Some(message.clone()),
      RawError::Normalized(err) => Some(err.message.clone()),
      RawError::Payload(_) | RawError::Unknown => None,
    }
  }

  fn transport_status(&self) -> Option<u16> {
    match self {
      RawError::Response { status, .. } => Some(*status),
      RawError::Transport { status, .. } => *status,
      RawError::Normalized(err) => err.status,
      _ => None,
    }
  }
}

impl From<NormalizedError> for RawError {
  fn from(err: NormalizedError) -> Self {
    RawError::Normalized(Box::new(err))
  }
}

impl From<reqwest::Error> for RawError {
  fn from(err: reqwest::Error) -> Self {
    RawError::Transport {
      message: err.to_string(),
      status: err.status().map(|s| s.as_u16()),
    }
  }
}

// ============================================================================
// Normalized error
// ============================================================================

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Input rejected locally.
  Validation,
  /// No response was received.
  Transport,
  /// The backend answered with a structured failure.
  Business,
  /// Anything else.
  Unknown,
}

/// The uniform error shape every consumer renders.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct NormalizedError {
  pub message: String,
  pub status: Option<u16>,
  pub raw: RawError,
}

impl NormalizedError {
  /// A local validation failure. Never issues a remote call.
  pub fn validation(message: impl Into<String>) -> Self {
    normalize(&RawError::Validation(message.into()))
  }

  pub fn kind(&self) -> ErrorKind {
    match &self.raw {
      RawError::Validation(_) => ErrorKind::Validation,
      RawError::Transport { .. } => ErrorKind::Transport,
      RawError::Response { .. } | RawError::Payload(_) => ErrorKind::Business,
      RawError::Normalized(inner) => inner.kind(),
      RawError::Internal(_) | RawError::Unknown => ErrorKind::Unknown,
    }
  }

  pub fn is_validation(&self) -> bool {
    self.kind() == ErrorKind::Validation
  }
}

impl From<RawError> for NormalizedError {
  fn from(raw: RawError) -> Self {
    normalize(&raw)
  }
}

impl From<color_eyre::Report> for NormalizedError {
  fn from(err: color_eyre::Report) -> Self {
    normalize(&RawError::Internal(err.to_string()))
  }
}

impl From<reqwest::Error> for NormalizedError {
  fn from(err: reqwest::Error) -> Self {
    normalize(&RawError::from(err))
  }
}

/// Convert any failure shape into a [`NormalizedError`].
///
/// Resolution order, first match wins:
/// 1. payload `message` is an array of strings, joined with `". "`
/// 2. payload `message` is a string
/// 3. the payload itself is a string
/// 4. the generic message of the failure
/// 5. [`DEFAULT_ERROR_MESSAGE`]
///
/// Empty strings never match. Status comes from the payload's `statusCode`,
/// then from the transport.
pub fn normalize(raw: &RawError) -> NormalizedError {
  let payload = raw.payload();

  let message = payload
    .and_then(message_from_payload)
    .or_else(|| raw.generic_message().filter(|m| !m.trim().is_empty()))
    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());

  let status = payload
    .and_then(|p| p.get("statusCode"))
    .and_then(Value::as_u64)
    .and_then(|code| u16::try_from(code).ok())
    .or_else(|| raw.transport_status());

  NormalizedError {
    message,
    status,
    raw: raw.clone(),
  }
}

fn message_from_payload(payload: &Value) -> Option<String> {
  match payload.get("message") {
    Some(Value::Array(parts)) => {
      let joined = parts
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(". ");
      if !joined.is_empty() {
        return Some(joined);
      }
    }
    Some(Value::String(message)) if !message.trim().is_empty() => {
      return Some(message.clone());
    }
    _ => {}
  }

  match payload {
    Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
    _ => None,
  }
}

// ============================================================================
// Success normalization
// ============================================================================

/// A success payload reduced to a confirmation message and its useful content.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSuccess {
  pub message: String,
  pub data: Value,
}

impl fmt::Display for NormalizedSuccess {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

/// Extract the confirmation message and main payload from a success body.
///
/// The message comes from `message` or `mensaje`; the payload is the first of
/// `usuario`, `user`, `data` that is present, else the body itself.
pub fn normalize_success(body: Value, default_message: &str) -> NormalizedSuccess {
  let message = ["message", "mensaje"]
    .iter()
    .filter_map(|key| body.get(*key).and_then(Value::as_str))
    .find(|m| !m.trim().is_empty())
    .unwrap_or(default_message)
    .to_string();

  let data = ["usuario", "user", "data"]
    .iter()
    .find_map(|key| body.get(*key).filter(|v| !v.is_null()).cloned())
    .unwrap_or(body);

  NormalizedSuccess { message, data }
}

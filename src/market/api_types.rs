//! Wire shapes that only exist at the HTTP boundary.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// A timestamp as the backend sends it: either an ISO string or a serialized
/// Firestore timestamp.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ApiTimestamp {
  Text(String),
  Seconds {
    #[serde(rename = "_seconds")]
    seconds: i64,
    #[serde(rename = "_nanoseconds", default)]
    nanoseconds: u32,
  },
}

impl ApiTimestamp {
  pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
    match self {
      ApiTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok(),
      ApiTimestamp::Seconds {
        seconds,
        nanoseconds,
      } => Utc.timestamp_opt(*seconds, *nanoseconds).single(),
    }
  }
}

/// Lenient timestamp field: missing, null or unparseable values become `None`.
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
  Ok(
    raw
      .and_then(|value| serde_json::from_value::<ApiTimestamp>(value).ok())
      .and_then(|ts| ts.to_datetime()),
  )
}

/// Body of `POST /favoritos`
#[derive(Debug, Serialize)]
pub struct ApiAddFavorite<'a> {
  #[serde(rename = "favoritoId")]
  pub favorite_id: &'a str,
}

/// Mime type for an image upload, from its extension
pub fn image_mime_type(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  match ext.as_deref() {
    Some("png") => "image/png",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    _ => "image/jpeg",
  }
}

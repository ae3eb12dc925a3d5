use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::api::{ApiResult, MarketApi};
use super::api_types::{image_mime_type, ApiAddFavorite};
use super::credits::CREDIT_USED_MESSAGE;
use super::types::{
  CreditReceipt, Favorite, ImageAttachment, NewOffer, Offer, PhotoUpload, Profile, ProfileUpdate,
};
use crate::config::Config;
use crate::error::{normalize_success, NormalizedError, RawError, DEFAULT_SUCCESS_MESSAGE};

/// HTTP client for the marketplace REST API
#[derive(Clone)]
pub struct MarketClient {
  http: reqwest::Client,
  base_url: Url,
  token: String,
}

impl MarketClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(&config.api.base_url, token, config.api.timeout())
  }

  pub fn with_token(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
    // Normalized to one trailing '/', which `endpoint` pops before appending
    let mut base = base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Endpoint URL under the base path, one escaped segment per element.
  ///
  /// Ids never add, remove or escape path segments: `/`, `?` and `#` are
  /// percent-encoded, and `.`/`..` or empty segments are rejected.
  fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
    if let Some(bad) = segments
      .iter()
      .find(|s| s.is_empty() || **s == "." || **s == "..")
    {
      return Err(NormalizedError::validation(format!(
        "Invalid path segment {:?}",
        bad
      )));
    }

    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| RawError::Internal(format!("API base URL cannot be a base: {}", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: Method, segments: &[&str]) -> ApiResult<RequestBuilder> {
    let url = self.endpoint(segments)?;
    Ok(self.http.request(method, url).bearer_auth(&self.token))
  }

  /// Send a request and return the raw JSON body of a 2xx response.
  async fn send(&self, request: RequestBuilder) -> ApiResult<Value> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    debug!(status, len = bytes.len(), "response received");

    if !(200..300).contains(&status) {
      return Err(error_from_response(status, &bytes));
    }
    if bytes.is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| {
      NormalizedError::from(RawError::Transport {
        message: format!("Failed to decode response: {}", e),
        status: Some(status),
      })
    })
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
    let body = self.send(request).await?;
    decode_body(body)
  }

  async fn offer_form(offer: NewOffer) -> ApiResult<Form> {
    let mut form = Form::new()
      .text("servicioId", offer.service_id)
      .text("titulo", offer.title)
      .text("disponibilidad", form_json(&offer.availability)?)
      .text("ubicacion", form_json(&offer.location)?);

    if let Some(description) = offer.description {
      form = form.text("descripcionPersonalizada", description);
    }
    if let Some(price) = offer.price {
      form = form.text("precioPersonalizado", price.to_string());
    }
    if let Some(image) = offer.image {
      form = form.part("imagen", image_part(image).await?);
    }

    Ok(form)
  }
}

/// File part for an image, typed from its extension unless given.
async fn image_part(image: ImageAttachment) -> ApiResult<Part> {
  let bytes = tokio::fs::read(&image.path).await.map_err(|e| {
    RawError::Internal(format!("Failed to read image {}: {}", image.path.display(), e))
  })?;
  let file_name = image
    .path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("photo.jpg")
    .to_string();
  let mime = image
    .mime_type
    .unwrap_or_else(|| image_mime_type(&image.path).to_string());
  Ok(Part::bytes(bytes).file_name(file_name).mime_str(&mime)?)
}

/// Nested form fields travel as JSON text
fn form_json<T: Serialize>(value: &T) -> ApiResult<String> {
  serde_json::to_string(value)
    .map_err(|e| RawError::Internal(format!("Failed to encode form field: {}", e)).into())
}

/// Normalized error for a non-2xx response body.
///
/// JSON bodies are kept as payloads; anything else is treated as a text payload.
pub fn error_from_response(status: u16, body: &[u8]) -> NormalizedError {
  let body = serde_json::from_slice::<Value>(body)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).trim().to_string()));
  NormalizedError::from(RawError::Response { status, body })
}

/// Decode a success body, unwrapping a `data`/`usuario` envelope first.
///
/// A body with its own `id` is an entity, not an envelope, even when it has a
/// nested `usuario`.
fn decode_body<T: DeserializeOwned>(body: Value) -> ApiResult<T> {
  let is_envelope = body.is_object()
    && body.get("id").is_none()
    && ["usuario", "user", "data"].iter().any(|k| body.get(*k).is_some());
  let body = if is_envelope {
    normalize_success(body, DEFAULT_SUCCESS_MESSAGE).data
  } else {
    body
  };

  serde_json::from_value::<T>(body).map_err(|e| {
    NormalizedError::from(RawError::Transport {
      message: format!("Unexpected response shape: {}", e),
      status: None,
    })
  })
}

#[async_trait]
impl MarketApi for MarketClient {
  #[instrument(skip(self))]
  async fn active_offers(&self) -> ApiResult<Vec<Offer>> {
    self.send_json(self.request(Method::GET, &["ofertas", "activas"])?).await
  }

  #[instrument(skip(self))]
  async fn my_offers(&self) -> ApiResult<Vec<Offer>> {
    self.send_json(self.request(Method::GET, &["ofertas", "mis-ofertas"])?).await
  }

  #[instrument(skip(self))]
  async fn offer(&self, id: &str) -> ApiResult<Offer> {
    self.send_json(self.request(Method::GET, &["ofertas", id])?).await
  }

  #[instrument(skip(self, offer), fields(title = %offer.title))]
  async fn create_offer(&self, offer: NewOffer) -> ApiResult<Offer> {
    let form = Self::offer_form(offer).await?;
    let request = self.request(Method::POST, &["ofertas"])?.multipart(form);
    self.send_json(request).await
  }

  #[instrument(skip(self))]
  async fn delete_offer(&self, id: &str) -> ApiResult<()> {
    self.send(self.request(Method::DELETE, &["ofertas", id])?).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn pause_offer(&self, id: &str) -> ApiResult<()> {
    self.send(self.request(Method::PATCH, &["ofertas", id, "pausar"])?).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn reactivate_offer(&self, id: &str) -> ApiResult<()> {
    self.send(self.request(Method::PATCH, &["ofertas", id, "reactivar"])?).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn favorites(&self) -> ApiResult<Vec<Favorite>> {
    self.send_json(self.request(Method::GET, &["favoritos"])?).await
  }

  #[instrument(skip(self))]
  async fn favorite(&self, id: &str) -> ApiResult<Favorite> {
    self.send_json(self.request(Method::GET, &["favoritos", id])?).await
  }

  #[instrument(skip(self))]
  async fn add_favorite(&self, user_id: &str) -> ApiResult<Favorite> {
    let request = self
      .request(Method::POST, &["favoritos"])?
      .json(&ApiAddFavorite {
        favorite_id: user_id,
      });
    self.send_json(request).await
  }

  #[instrument(skip(self))]
  async fn remove_favorite(&self, id: &str) -> ApiResult<()> {
    self.send(self.request(Method::DELETE, &["favoritos", id])?).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn consume_credit(&self, owner_id: &str) -> ApiResult<CreditReceipt> {
    let request = self.request(Method::POST, &["creditos", "usar", owner_id])?;
    let body = self.send(request).await?;
    let success = normalize_success(body, CREDIT_USED_MESSAGE);
    Ok(CreditReceipt {
      message: success.message,
    })
  }

  #[instrument(skip(self))]
  async fn profile(&self) -> ApiResult<Profile> {
    self.send_json(self.request(Method::GET, &["usuarios", "perfil"])?).await
  }

  #[instrument(skip(self, update))]
  async fn update_profile(&self, update: ProfileUpdate) -> ApiResult<Profile> {
    let request = self.request(Method::PATCH, &["usuarios", "perfil"])?.json(&update);
    self.send_json(request).await
  }

  #[instrument(skip(self, update))]
  async fn configure_profile(&self, user_id: &str, update: ProfileUpdate) -> ApiResult<Profile> {
    let request = self
      .request(Method::PATCH, &["usuarios", user_id, "configurar-perfil"])?
      .json(&update);
    self.send_json(request).await
  }

  #[instrument(skip(self, photo), fields(path = %photo.path.display()))]
  async fn update_profile_photo(&self, photo: ImageAttachment) -> ApiResult<PhotoUpload> {
    let form = Form::new().part("archivo", image_part(photo).await?);
    let request = self
      .request(Method::PATCH, &["usuarios", "perfil", "foto"])?
      .multipart(form);
    self.send_json(request).await
  }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::api_types::deserialize_timestamp;
use crate::cache::Cacheable;

/// Publication status of an offer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
  #[default]
  #[serde(rename = "activa")]
  Active,
  #[serde(rename = "pausada")]
  Paused,
  #[serde(other, rename = "otro")]
  Other,
}

/// Which status write flips an offer from its current status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
  Pause,
  Reactivate,
}

impl OfferStatus {
  /// The write that toggles this status: active offers get paused, anything
  /// else gets reactivated.
  pub fn toggle_action(self) -> StatusAction {
    match self {
      OfferStatus::Active => StatusAction::Pause,
      OfferStatus::Paused | OfferStatus::Other => StatusAction::Reactivate,
    }
  }
}

impl fmt::Display for OfferStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OfferStatus::Active => f.write_str("activa"),
      OfferStatus::Paused => f.write_str("pausada"),
      OfferStatus::Other => f.write_str("otro"),
    }
  }
}

/// How an offer is delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
  #[default]
  Presencial,
  Virtual,
  Ambas,
}

/// Weekly availability window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Availability {
  #[serde(rename = "diasSemana", default)]
  pub days: Vec<String>,
  #[serde(rename = "horaInicio", default)]
  pub start_time: String,
  #[serde(rename = "horaFin", default)]
  pub end_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
  #[serde(rename = "ciudad", default)]
  pub city: String,
  #[serde(rename = "direccion", default, skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(rename = "modalidad", default)]
  pub modality: Modality,
}

/// The other party shown on an offer or favorite card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counterpart {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "nombreCompleto", default)]
  pub full_name: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(rename = "calificacionPromedio", default)]
  pub rating: Option<f64>,
  #[serde(rename = "fotoPerfil", alias = "urlFoto", default)]
  pub photo_url: Option<String>,
}

/// Catalogue service an offer is based on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "titulo", default)]
  pub title: Option<String>,
  #[serde(rename = "categoria", default)]
  pub category: Option<String>,
  #[serde(rename = "precio", default)]
  pub price: Option<f64>,
}

/// An offer published by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
  pub id: String,
  #[serde(rename = "usuarioId", default)]
  pub owner_id: Option<String>,
  #[serde(rename = "servicioId", default)]
  pub service_id: Option<String>,
  #[serde(rename = "titulo", default)]
  pub title: String,
  #[serde(rename = "descripcionPersonalizada", default)]
  pub description: Option<String>,
  #[serde(rename = "precioPersonalizado", default)]
  pub price: Option<f64>,
  #[serde(rename = "imagenUrl", default)]
  pub image_url: Option<String>,
  #[serde(rename = "disponibilidad", default)]
  pub availability: Option<Availability>,
  #[serde(rename = "ubicacion", default)]
  pub location: Option<Location>,
  #[serde(rename = "estado", default)]
  pub status: OfferStatus,
  #[serde(rename = "fechaCreacion", default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(rename = "fechaActualizacion", default, deserialize_with = "deserialize_timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(rename = "servicio", default)]
  pub service: Option<ServiceSummary>,
  #[serde(rename = "usuario", default)]
  pub owner: Option<Counterpart>,
}

/// A user bookmarked by the current user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
  pub id: String,
  #[serde(rename = "usuarioId", default)]
  pub owner_id: Option<String>,
  /// The bookmarked user
  #[serde(rename = "favoritoId", default)]
  pub target_user_id: Option<String>,
  #[serde(rename = "fechaCreacion", default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(rename = "usuario", default)]
  pub user: Option<Counterpart>,
}

/// The signed-in user's profile, including the credit balance every header shows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(rename = "nombreCompleto", default)]
  pub full_name: Option<String>,
  #[serde(rename = "numeroContacto", default)]
  pub phone: Option<String>,
  #[serde(rename = "edad", default)]
  pub age: Option<u32>,
  #[serde(rename = "rol", default)]
  pub role: Option<String>,
  #[serde(rename = "activo", default)]
  pub active: Option<bool>,
  #[serde(rename = "ci", default)]
  pub national_id: Option<String>,
  #[serde(rename = "ciudad", default)]
  pub city: Option<String>,
  #[serde(rename = "urlFoto", default)]
  pub photo_url: Option<String>,
  #[serde(rename = "nivelEducacion", default)]
  pub education_level: Option<String>,
  #[serde(rename = "ciudadania", default)]
  pub citizenship: Option<String>,
  #[serde(rename = "creditosDisponibles", default)]
  pub credits: Option<i64>,
  #[serde(rename = "fechaCreacion", default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(rename = "fechaActualizacion", default, deserialize_with = "deserialize_timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
  /// Overlay the fields present in `newer` onto this profile.
  pub fn merged_with(self, newer: Profile) -> Profile {
    Profile {
      id: newer.id.or(self.id),
      email: newer.email.or(self.email),
      full_name: newer.full_name.or(self.full_name),
      phone: newer.phone.or(self.phone),
      age: newer.age.or(self.age),
      role: newer.role.or(self.role),
      active: newer.active.or(self.active),
      national_id: newer.national_id.or(self.national_id),
      city: newer.city.or(self.city),
      photo_url: newer.photo_url.or(self.photo_url),
      education_level: newer.education_level.or(self.education_level),
      citizenship: newer.citizenship.or(self.citizenship),
      credits: newer.credits.or(self.credits),
      created_at: newer.created_at.or(self.created_at),
      updated_at: newer.updated_at.or(self.updated_at),
    }
  }
}

impl Cacheable for Profile {
  fn entity_type() -> &'static str {
    "profile"
  }
}

/// Desired-job section of the additional profile info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredJob {
  #[serde(rename = "tipo")]
  pub kind: String,
  #[serde(rename = "ciudad")]
  pub city: String,
  #[serde(rename = "expectativaIngresos", skip_serializing_if = "Option::is_none")]
  pub expected_income: Option<f64>,
}

/// Partial profile update; only the fields that are set are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
  #[serde(rename = "nombreCompleto", skip_serializing_if = "Option::is_none")]
  pub full_name: Option<String>,
  #[serde(rename = "numeroContacto", skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(rename = "edad", skip_serializing_if = "Option::is_none")]
  pub age: Option<u32>,
  #[serde(rename = "ci", skip_serializing_if = "Option::is_none")]
  pub national_id: Option<String>,
  #[serde(rename = "urlFoto", skip_serializing_if = "Option::is_none")]
  pub photo_url: Option<String>,
  #[serde(rename = "nivelEducacion", skip_serializing_if = "Option::is_none")]
  pub education_level: Option<String>,
  #[serde(rename = "ciudadania", skip_serializing_if = "Option::is_none")]
  pub citizenship: Option<String>,
  #[serde(rename = "trabajoDeseado", skip_serializing_if = "Option::is_none")]
  pub desired_job: Option<DesiredJob>,
  #[serde(rename = "contactosFavoritos", skip_serializing_if = "Option::is_none")]
  pub favorite_contacts: Option<Vec<String>>,
}

/// Image file attached to an upload
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
  pub path: PathBuf,
  /// Detected from the file extension when absent
  pub mime_type: Option<String>,
}

/// Input of the create-offer write
#[derive(Debug, Clone, PartialEq)]
pub struct NewOffer {
  pub service_id: String,
  pub title: String,
  pub description: Option<String>,
  pub price: Option<f64>,
  pub image: Option<ImageAttachment>,
  pub availability: Availability,
  pub location: Location,
}

/// Answer of a profile photo upload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PhotoUpload {
  #[serde(rename = "urlFoto", default)]
  pub photo_url: Option<String>,
}

/// Confirmation returned by a credit consumption
#[derive(Debug, Clone, PartialEq)]
pub struct CreditReceipt {
  pub message: String,
}

//! In-memory backend for tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::api::{ApiResult, MarketApi};
use super::types::{
  CreditReceipt, Favorite, ImageAttachment, NewOffer, Offer, OfferStatus, PhotoUpload, Profile,
  ProfileUpdate,
};
use crate::error::{NormalizedError, RawError};

/// The signed-in user of every fake backend
pub const ME: &str = "u-me";

#[derive(Default)]
struct Store {
  offers: Vec<Offer>,
  favorites: Vec<Favorite>,
  profile: Profile,
  next_id: u64,
}

/// Backend double with call counters, per-operation latency and injected
/// failures.
#[derive(Default)]
pub struct FakeMarket {
  store: Mutex<Store>,
  calls: Mutex<HashMap<&'static str, usize>>,
  delays: Mutex<HashMap<&'static str, Duration>>,
  /// Injected error and how many more calls it applies to (`None`: until recovered)
  failures: Mutex<HashMap<&'static str, (NormalizedError, Option<usize>)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn offer(id: &str, owner: &str, status: OfferStatus) -> Offer {
  Offer {
    id: id.to_string(),
    owner_id: Some(owner.to_string()),
    service_id: Some("s1".to_string()),
    title: format!("Offer {}", id),
    description: None,
    price: Some(100.0),
    image_url: None,
    availability: None,
    location: None,
    status,
    created_at: None,
    updated_at: None,
    service: None,
    owner: None,
  }
}

pub fn favorite(id: &str, target: &str) -> Favorite {
  Favorite {
    id: id.to_string(),
    owner_id: Some(ME.to_string()),
    target_user_id: Some(target.to_string()),
    created_at: None,
    user: None,
  }
}

fn apply_update(profile: &mut Profile, update: ProfileUpdate) {
  if let Some(name) = update.full_name {
    profile.full_name = Some(name);
  }
  if let Some(phone) = update.phone {
    profile.phone = Some(phone);
  }
  if let Some(age) = update.age {
    profile.age = Some(age);
  }
  if let Some(ci) = update.national_id {
    profile.national_id = Some(ci);
  }
  if let Some(photo) = update.photo_url {
    profile.photo_url = Some(photo);
  }
  if let Some(level) = update.education_level {
    profile.education_level = Some(level);
  }
  if let Some(citizenship) = update.citizenship {
    profile.citizenship = Some(citizenship);
  }
}

fn business(status: u16, message: &str) -> NormalizedError {
  NormalizedError::from(RawError::Response {
    status,
    body: json!({ "message": message, "statusCode": status }),
  })
}

impl FakeMarket {
  pub fn new() -> Self {
    let fake = Self::default();
    lock(&fake.store).profile = Profile {
      id: Some(ME.to_string()),
      full_name: Some("Test User".to_string()),
      credits: Some(5),
      ..Profile::default()
    };
    fake
  }

  pub fn with_offers(self, offers: Vec<Offer>) -> Self {
    lock(&self.store).offers = offers;
    self
  }

  pub fn with_favorites(self, favorites: Vec<Favorite>) -> Self {
    lock(&self.store).favorites = favorites;
    self
  }

  pub fn with_credits(self, credits: i64) -> Self {
    lock(&self.store).profile.credits = Some(credits);
    self
  }

  /// Make `op` sleep before answering
  pub fn delay(&self, op: &'static str, delay: Duration) {
    lock(&self.delays).insert(op, delay);
  }

  /// Make `op` fail with `err` until [`FakeMarket::recover`] is called
  pub fn fail(&self, op: &'static str, err: NormalizedError) {
    lock(&self.failures).insert(op, (err, None));
  }

  /// Make the next `times` calls of `op` fail with `err`
  pub fn fail_times(&self, op: &'static str, times: usize, err: NormalizedError) {
    if times > 0 {
      lock(&self.failures).insert(op, (err, Some(times)));
    }
  }

  pub fn recover(&self, op: &'static str) {
    lock(&self.failures).remove(op);
  }

  pub fn calls(&self, op: &'static str) -> usize {
    lock(&self.calls).get(op).copied().unwrap_or(0)
  }

  /// Server-side credit balance
  pub fn credits(&self) -> Option<i64> {
    lock(&self.store).profile.credits
  }

  async fn enter(&self, op: &'static str) -> ApiResult<()> {
    *lock(&self.calls).entry(op).or_insert(0) += 1;
    let delay = lock(&self.delays).get(op).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    let mut failures = lock(&self.failures);
    let Some((err, remaining)) = failures.get_mut(op) else {
      return Ok(());
    };
    let err = err.clone();
    if let Some(n) = remaining {
      *n -= 1;
      if *n == 0 {
        failures.remove(op);
      }
    }
    Err(err)
  }

  fn set_status(&self, id: &str, status: OfferStatus) -> ApiResult<()> {
    let mut store = lock(&self.store);
    let offer = store
      .offers
      .iter_mut()
      .find(|o| o.id == id)
      .ok_or_else(|| business(404, "Oferta no encontrada"))?;
    offer.status = status;
    Ok(())
  }
}

#[async_trait]
impl MarketApi for FakeMarket {
  async fn active_offers(&self) -> ApiResult<Vec<Offer>> {
    self.enter("active_offers").await?;
    let store = lock(&self.store);
    Ok(
      store
        .offers
        .iter()
        .rev()
        .filter(|o| o.status == OfferStatus::Active)
        .cloned()
        .collect(),
    )
  }

  async fn my_offers(&self) -> ApiResult<Vec<Offer>> {
    self.enter("my_offers").await?;
    let store = lock(&self.store);
    Ok(
      store
        .offers
        .iter()
        .rev()
        .filter(|o| o.owner_id.as_deref() == Some(ME))
        .cloned()
        .collect(),
    )
  }

  async fn offer(&self, id: &str) -> ApiResult<Offer> {
    self.enter("offer").await?;
    let store = lock(&self.store);
    store
      .offers
      .iter()
      .find(|o| o.id == id)
      .cloned()
      .ok_or_else(|| business(404, "Oferta no encontrada"))
  }

  async fn create_offer(&self, new: NewOffer) -> ApiResult<Offer> {
    self.enter("create_offer").await?;
    let mut store = lock(&self.store);
    store.next_id += 1;
    let mut created = offer(&format!("o-new-{}", store.next_id), ME, OfferStatus::Active);
    created.service_id = Some(new.service_id);
    created.title = new.title;
    created.description = new.description;
    created.price = new.price;
    created.availability = Some(new.availability);
    created.location = Some(new.location);
    store.offers.push(created.clone());
    Ok(created)
  }

  async fn delete_offer(&self, id: &str) -> ApiResult<()> {
    self.enter("delete_offer").await?;
    let mut store = lock(&self.store);
    let before = store.offers.len();
    store.offers.retain(|o| o.id != id);
    if store.offers.len() == before {
      return Err(business(404, "Oferta no encontrada"));
    }
    Ok(())
  }

  async fn pause_offer(&self, id: &str) -> ApiResult<()> {
    self.enter("pause_offer").await?;
    self.set_status(id, OfferStatus::Paused)
  }

  async fn reactivate_offer(&self, id: &str) -> ApiResult<()> {
    self.enter("reactivate_offer").await?;
    self.set_status(id, OfferStatus::Active)
  }

  async fn favorites(&self) -> ApiResult<Vec<Favorite>> {
    self.enter("favorites").await?;
    Ok(lock(&self.store).favorites.clone())
  }

  async fn favorite(&self, id: &str) -> ApiResult<Favorite> {
    self.enter("favorite").await?;
    let store = lock(&self.store);
    store
      .favorites
      .iter()
      .find(|f| f.id == id)
      .cloned()
      .ok_or_else(|| business(404, "Favorito no encontrado"))
  }

  async fn add_favorite(&self, user_id: &str) -> ApiResult<Favorite> {
    self.enter("add_favorite").await?;
    let mut store = lock(&self.store);
    if store
      .favorites
      .iter()
      .any(|f| f.target_user_id.as_deref() == Some(user_id))
    {
      return Err(business(409, "El usuario ya está en favoritos"));
    }
    store.next_id += 1;
    let created = favorite(&format!("f-new-{}", store.next_id), user_id);
    store.favorites.push(created.clone());
    Ok(created)
  }

  async fn remove_favorite(&self, id: &str) -> ApiResult<()> {
    self.enter("remove_favorite").await?;
    let mut store = lock(&self.store);
    let before = store.favorites.len();
    store.favorites.retain(|f| f.id != id);
    if store.favorites.len() == before {
      return Err(business(404, "Favorito no encontrado"));
    }
    Ok(())
  }

  async fn consume_credit(&self, owner_id: &str) -> ApiResult<CreditReceipt> {
    self.enter("consume_credit").await?;
    let mut store = lock(&self.store);
    if store.profile.id.as_deref() != Some(owner_id) {
      return Err(business(404, "Cliente no encontrado"));
    }
    match store.profile.credits {
      Some(n) if n > 0 => {
        store.profile.credits = Some(n - 1);
        Ok(CreditReceipt {
          message: "Crédito consumido exitosamente".to_string(),
        })
      }
      _ => Err(business(400, "Créditos insuficientes")),
    }
  }

  async fn profile(&self) -> ApiResult<Profile> {
    self.enter("profile").await?;
    Ok(lock(&self.store).profile.clone())
  }

  async fn update_profile(&self, update: ProfileUpdate) -> ApiResult<Profile> {
    self.enter("update_profile").await?;
    let mut store = lock(&self.store);
    apply_update(&mut store.profile, update);
    Ok(store.profile.clone())
  }

  async fn configure_profile(&self, user_id: &str, update: ProfileUpdate) -> ApiResult<Profile> {
    self.enter("configure_profile").await?;
    let mut store = lock(&self.store);
    if store.profile.id.as_deref() != Some(user_id) {
      return Err(business(404, "Usuario no encontrado"));
    }
    apply_update(&mut store.profile, update);
    Ok(store.profile.clone())
  }

  async fn update_profile_photo(&self, photo: ImageAttachment) -> ApiResult<PhotoUpload> {
    self.enter("update_profile_photo").await?;
    let name = photo
      .path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or("photo.jpg");
    let url = format!("https://cdn.example.com/perfiles/{}", name);
    lock(&self.store).profile.photo_url = Some(url.clone());
    Ok(PhotoUpload {
      photo_url: Some(url),
    })
  }
}

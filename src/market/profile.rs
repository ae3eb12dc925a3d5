//! The signed-in user's profile, cached under a fixed key.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::api::MarketApi;
use super::types::{ImageAttachment, PhotoUpload, Profile, ProfileUpdate};
use super::Marketplace;
use crate::cache::{CacheResult, QueryCache};
use crate::error::NormalizedError;
use crate::mutation::{Mutation, MutationState};
use crate::retry::RetryPolicy;

/// Cache key of the profile entry every credit display reads.
pub const PROFILE_KEY: &str = "userProfile";

/// Reads and writes of the cached profile.
///
/// Cache-first reads use the cache's stale time. [`ProfileStore::refresh`] is
/// the authoritative read: it always replaces the cached entry, including a
/// locally decremented credit balance. Every server read of the profile is
/// retried according to the store's [`RetryPolicy`].
pub struct ProfileStore {
  api: Arc<dyn MarketApi>,
  cache: QueryCache,
  retry: RetryPolicy,
  update: Mutation<ProfileUpdate, Profile>,
  configure: Mutation<ProfileUpdate, Profile>,
  photo: Mutation<ImageAttachment, PhotoUpload>,
}

impl ProfileStore {
  pub fn new(api: Arc<dyn MarketApi>, cache: QueryCache, retry: RetryPolicy) -> Self {
    let update = {
      let api = Arc::clone(&api);
      let cache = cache.clone();
      Mutation::new("update profile", move |patch: ProfileUpdate| {
        let api = Arc::clone(&api);
        let cache = cache.clone();
        async move { apply_update(api.as_ref(), &cache, retry, patch).await }
      })
    };

    let configure = {
      let api = Arc::clone(&api);
      let cache = cache.clone();
      Mutation::new("configure profile", move |additional: ProfileUpdate| {
        let api = Arc::clone(&api);
        let cache = cache.clone();
        async move { apply_configure(api.as_ref(), &cache, additional).await }
      })
    };

    let photo = {
      let api = Arc::clone(&api);
      let cache = cache.clone();
      Mutation::new("update profile photo", move |photo: ImageAttachment| {
        let api = Arc::clone(&api);
        let cache = cache.clone();
        async move { apply_photo(api.as_ref(), &cache, photo).await }
      })
    };

    Self {
      api,
      cache,
      retry,
      update,
      configure,
      photo,
    }
  }

  /// Cache-first read; falls back to a stale entry when the network fails.
  pub async fn profile(&self) -> Result<CacheResult<Profile>, NormalizedError> {
    self
      .cache
      .fetch_one(PROFILE_KEY, || fetch_profile(self.api.as_ref(), self.retry))
      .await
  }

  /// Fetch from the server and overwrite the cached profile.
  pub async fn refresh(&self) -> Result<Profile, NormalizedError> {
    let profile = self
      .cache
      .refresh(PROFILE_KEY, || fetch_profile(self.api.as_ref(), self.retry))
      .await?;
    debug!(credits = ?profile.credits, "profile reconciled with server");
    Ok(profile)
  }

  /// Cached credit balance, 0 when nothing is cached.
  pub fn credits(&self) -> Result<i64> {
    Ok(
      self
        .cache
        .get::<Profile>(PROFILE_KEY)?
        .and_then(|p| p.credits)
        .unwrap_or(0),
    )
  }

  /// Mark the cached profile stale so the next read goes to the server.
  pub fn invalidate(&self) -> Result<()> {
    self.cache.invalidate::<Profile>(PROFILE_KEY)
  }

  /// Send a partial update, merge the answer into the cache, then reconcile.
  pub async fn update_profile(&self, patch: ProfileUpdate) -> Result<Profile, NormalizedError> {
    self.update.execute(patch).await
  }

  /// Save the additional info (education, citizenship, desired job, contacts).
  ///
  /// The user id comes from the cached profile; without one the call fails
  /// locally. The answer is merged into the cache, which is then marked stale.
  pub async fn configure_profile(
    &self,
    additional: ProfileUpdate,
  ) -> Result<Profile, NormalizedError> {
    self.configure.execute(additional).await
  }

  /// Upload a new profile photo and mark the cached profile stale.
  pub async fn update_profile_photo(
    &self,
    photo: ImageAttachment,
  ) -> Result<PhotoUpload, NormalizedError> {
    self.photo.execute(photo).await
  }

  /// Shared by the profile update and the additional-info save.
  pub fn update_state(&self) -> MutationState {
    let update = self.update.snapshot();
    let configure = self.configure.snapshot();
    MutationState {
      loading: update.loading || configure.loading,
      error: configure.error.or(update.error),
    }
  }

  pub fn subscribe_update(&self) -> watch::Receiver<MutationState> {
    self.update.subscribe()
  }

  pub fn photo_state(&self) -> MutationState {
    self.photo.snapshot()
  }

  pub fn is_uploading_photo(&self) -> bool {
    self.photo.is_loading()
  }

  /// Forget the last update, configure and photo errors.
  pub fn reset_state(&self) {
    self.update.reset();
    self.configure.reset();
    self.photo.reset();
  }
}

async fn fetch_profile(
  api: &dyn MarketApi,
  retry: RetryPolicy,
) -> Result<Profile, NormalizedError> {
  retry.run("profile", || api.profile()).await
}

/// Overlay `newer` onto the cached profile and store the result.
fn merge_into_cache(cache: &QueryCache, newer: Profile) -> Result<Profile, NormalizedError> {
  let merged = match cache.get::<Profile>(PROFILE_KEY)? {
    Some(cached) => cached.merged_with(newer),
    None => newer,
  };
  cache.set(PROFILE_KEY, &merged)?;
  Ok(merged)
}

async fn apply_update(
  api: &dyn MarketApi,
  cache: &QueryCache,
  retry: RetryPolicy,
  patch: ProfileUpdate,
) -> Result<Profile, NormalizedError> {
  let updated = api.update_profile(patch).await?;
  let merged = merge_into_cache(cache, updated)?;

  match cache.refresh(PROFILE_KEY, || fetch_profile(api, retry)).await {
    Ok(fresh) => Ok(fresh),
    Err(err) => {
      // The write itself committed; keep the merged value until the next read.
      warn!("profile refetch after update failed: {}", err);
      Ok(merged)
    }
  }
}

async fn apply_configure(
  api: &dyn MarketApi,
  cache: &QueryCache,
  additional: ProfileUpdate,
) -> Result<Profile, NormalizedError> {
  let user_id = cache
    .get::<Profile>(PROFILE_KEY)?
    .and_then(|p| p.id)
    .filter(|id| !id.trim().is_empty())
    .ok_or_else(|| NormalizedError::validation("User is not signed in or has no id"))?;

  let configured = api.configure_profile(&user_id, additional).await?;
  let merged = merge_into_cache(cache, configured)?;
  cache.invalidate::<Profile>(PROFILE_KEY)?;
  info!(user_id = %user_id, "additional profile info saved");
  Ok(merged)
}

async fn apply_photo(
  api: &dyn MarketApi,
  cache: &QueryCache,
  photo: ImageAttachment,
) -> Result<PhotoUpload, NormalizedError> {
  if photo.path.as_os_str().is_empty() {
    return Err(NormalizedError::validation("A photo is required"));
  }

  let upload = api.update_profile_photo(photo).await?;
  if let Some(url) = upload.photo_url.clone() {
    cache.update(PROFILE_KEY, move |mut profile: Profile| {
      profile.photo_url = Some(url);
      profile
    })?;
  }
  cache.invalidate::<Profile>(PROFILE_KEY)?;
  Ok(upload)
}

impl Marketplace {
  pub fn profile_store(&self) -> ProfileStore {
    ProfileStore::new(Arc::clone(&self.api), self.cache.clone(), self.retry)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage, StorageBackend};
  use crate::error::{ErrorKind, RawError};
  use crate::market::fake::{FakeMarket, ME};
  use crate::market::types::DesiredJob;
  use serde_json::json;
  use std::path::PathBuf;
  use std::time::Duration;

  fn setup(fake: FakeMarket, cache: QueryCache) -> (Arc<FakeMarket>, ProfileStore) {
    let fake = Arc::new(fake);
    let store = ProfileStore::new(fake.clone(), cache, RetryPolicy::immediate(2));
    (fake, store)
  }

  fn network_down() -> NormalizedError {
    NormalizedError::from(RawError::Transport {
      message: "network unreachable".into(),
      status: None,
    })
  }

  fn photo(path: &str) -> ImageAttachment {
    ImageAttachment {
      path: PathBuf::from(path),
      mime_type: None,
    }
  }

  fn memory_cache() -> QueryCache {
    QueryCache::new(StorageBackend::Memory(MemoryStorage::new()))
  }

  #[tokio::test]
  async fn test_profile_is_cache_first() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());

    let first = store.profile().await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    let second = store.profile().await.unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(fake.calls("profile"), 1);

    store.invalidate().unwrap();
    let third = store.profile().await.unwrap();
    assert_eq!(third.source, CacheSource::Network);
    assert_eq!(fake.calls("profile"), 2);
  }

  #[tokio::test]
  async fn test_stale_profile_served_offline() {
    let cache = memory_cache().with_stale_time(chrono::Duration::zero());
    let (fake, store) = setup(FakeMarket::new().with_credits(8), cache);
    store.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    fake.fail("profile", network_down());
    let result = store.profile().await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.credits, Some(8));
    // One initial read plus two retries, on top of the first refresh.
    assert_eq!(fake.calls("profile"), 4);

    fake.recover("profile");
    let result = store.profile().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(fake.calls("profile"), 5);
  }

  #[tokio::test]
  async fn test_profile_read_retries_transient_failures() {
    let (fake, store) = setup(FakeMarket::new().with_credits(4), memory_cache());
    fake.fail_times("profile", 2, network_down());

    let profile = store.refresh().await.unwrap();
    assert_eq!(profile.credits, Some(4));
    assert_eq!(fake.calls("profile"), 3);
  }

  #[tokio::test]
  async fn test_profile_read_gives_up_after_retries() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());
    fake.fail("profile", network_down());

    let err = store.profile().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(fake.calls("profile"), 3);
    assert_eq!(store.credits().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_credits_default_to_zero() {
    let (_fake, store) = setup(FakeMarket::new().with_credits(3), memory_cache());
    assert_eq!(store.credits().unwrap(), 0);
    store.refresh().await.unwrap();
    assert_eq!(store.credits().unwrap(), 3);
  }

  #[tokio::test]
  async fn test_update_profile_merges_and_reconciles() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());
    store.refresh().await.unwrap();

    let updated = store
      .update_profile(ProfileUpdate {
        full_name: Some("Ana Pérez".into()),
        phone: Some("70000000".into()),
        ..ProfileUpdate::default()
      })
      .await
      .unwrap();

    assert_eq!(updated.full_name.as_deref(), Some("Ana Pérez"));
    assert_eq!(updated.credits, Some(5));
    assert_eq!(fake.calls("profile"), 2);
    let cached = store.profile().await.unwrap().data;
    assert_eq!(cached.phone.as_deref(), Some("70000000"));
    assert_eq!(store.update_state(), MutationState::default());
  }

  #[tokio::test]
  async fn test_update_failure_is_stored_and_cache_untouched() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());
    store.refresh().await.unwrap();
    fake.fail(
      "update_profile",
      NormalizedError::from(RawError::Response {
        status: 400,
        body: json!({ "message": ["edad must be a positive number"], "statusCode": 400 }),
      }),
    );

    let err = store
      .update_profile(ProfileUpdate {
        age: Some(0),
        ..ProfileUpdate::default()
      })
      .await
      .unwrap_err();

    assert_eq!(err.message, "edad must be a positive number");
    assert_eq!(
      store.update_state().error.map(|e| e.message),
      Some(err.message)
    );
    assert_eq!(
      store.profile().await.unwrap().data.full_name.as_deref(),
      Some("Test User")
    );

    store.reset_state();
    assert!(store.update_state().error.is_none());
  }

  #[tokio::test]
  async fn test_configure_profile_uses_cached_id() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());
    store.refresh().await.unwrap();

    let configured = store
      .configure_profile(ProfileUpdate {
        education_level: Some("Universitario".into()),
        citizenship: Some("Boliviana".into()),
        desired_job: Some(DesiredJob {
          kind: "Plomería".into(),
          city: "La Paz".into(),
          expected_income: Some(3500.0),
        }),
        ..ProfileUpdate::default()
      })
      .await
      .unwrap();

    assert_eq!(fake.calls("configure_profile"), 1);
    assert_eq!(configured.id.as_deref(), Some(ME));
    assert_eq!(configured.education_level.as_deref(), Some("Universitario"));
    assert_eq!(configured.credits, Some(5));

    // Merged into the cache, then marked stale.
    let cached = store.profile().await.unwrap();
    assert_eq!(cached.source, CacheSource::Network);
    assert_eq!(cached.data.citizenship.as_deref(), Some("Boliviana"));
    assert_eq!(fake.calls("profile"), 2);
  }

  #[tokio::test]
  async fn test_configure_profile_without_cached_id_fails_locally() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());

    let err = store
      .configure_profile(ProfileUpdate {
        education_level: Some("Bachiller".into()),
        ..ProfileUpdate::default()
      })
      .await
      .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fake.calls("configure_profile"), 0);
    assert_eq!(store.update_state().error.map(|e| e.message), Some(err.message));

    store.reset_state();
    assert_eq!(store.update_state(), MutationState::default());
  }

  #[tokio::test]
  async fn test_photo_upload_patches_cache_and_marks_stale() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());
    store.refresh().await.unwrap();

    let upload = store.update_profile_photo(photo("/tmp/yo.png")).await.unwrap();
    assert_eq!(
      upload.photo_url.as_deref(),
      Some("https://cdn.example.com/perfiles/yo.png")
    );
    assert!(!store.is_uploading_photo());

    let cached = store.cache.get::<Profile>(PROFILE_KEY).unwrap().unwrap();
    assert_eq!(cached.photo_url, upload.photo_url);
    assert_eq!(store.profile().await.unwrap().source, CacheSource::Network);
    assert_eq!(fake.calls("profile"), 2);
  }

  #[tokio::test]
  async fn test_photo_upload_failure_is_stored() {
    let (fake, store) = setup(FakeMarket::new(), memory_cache());
    store.refresh().await.unwrap();
    fake.fail(
      "update_profile_photo",
      NormalizedError::from(RawError::Response {
        status: 413,
        body: json!({ "message": "Archivo demasiado grande", "statusCode": 413 }),
      }),
    );

    let err = store.update_profile_photo(photo("big.jpg")).await.unwrap_err();
    assert_eq!(err.message, "Archivo demasiado grande");
    assert_eq!(store.photo_state().error.map(|e| e.message), Some(err.message));
    let cached = store.cache.get::<Profile>(PROFILE_KEY).unwrap().unwrap();
    assert!(cached.photo_url.is_none());

    let err = store.update_profile_photo(photo("")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fake.calls("update_profile_photo"), 1);
  }
}

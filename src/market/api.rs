use async_trait::async_trait;

use super::types::{
  CreditReceipt, Favorite, ImageAttachment, NewOffer, Offer, PhotoUpload, Profile, ProfileUpdate,
};
use crate::error::NormalizedError;

pub type ApiResult<T> = Result<T, NormalizedError>;

/// Remote operations of the marketplace backend.
///
/// Every failure is already normalized when it leaves an implementation.
#[async_trait]
pub trait MarketApi: Send + Sync {
  /// All active offers, newest first
  async fn active_offers(&self) -> ApiResult<Vec<Offer>>;

  /// Offers published by the signed-in user, any status
  async fn my_offers(&self) -> ApiResult<Vec<Offer>>;

  async fn offer(&self, id: &str) -> ApiResult<Offer>;

  async fn create_offer(&self, offer: NewOffer) -> ApiResult<Offer>;

  async fn delete_offer(&self, id: &str) -> ApiResult<()>;

  async fn pause_offer(&self, id: &str) -> ApiResult<()>;

  async fn reactivate_offer(&self, id: &str) -> ApiResult<()>;

  /// Users the signed-in user bookmarked
  async fn favorites(&self) -> ApiResult<Vec<Favorite>>;

  async fn favorite(&self, id: &str) -> ApiResult<Favorite>;

  /// Bookmark the user with id `user_id`
  async fn add_favorite(&self, user_id: &str) -> ApiResult<Favorite>;

  /// Delete the favorite record `id`
  async fn remove_favorite(&self, id: &str) -> ApiResult<()>;

  /// Spend one credit of `owner_id`
  async fn consume_credit(&self, owner_id: &str) -> ApiResult<CreditReceipt>;

  async fn profile(&self) -> ApiResult<Profile>;

  async fn update_profile(&self, update: ProfileUpdate) -> ApiResult<Profile>;

  /// Save the additional profile info of user `user_id`
  async fn configure_profile(&self, user_id: &str, update: ProfileUpdate) -> ApiResult<Profile>;

  /// Replace the signed-in user's photo
  async fn update_profile_photo(&self, photo: ImageAttachment) -> ApiResult<PhotoUpload>;
}

//! Favorite queries and writes.

use std::sync::Arc;

use super::types::Favorite;
use super::Marketplace;
use crate::error::NormalizedError;
use crate::mutation::Mutation;
use crate::query::Query;

pub type FavoriteList = Query<Vec<Favorite>>;
pub type FavoriteDetail = Query<Favorite, String>;

fn require(value: &str, what: &str) -> Result<(), NormalizedError> {
  if value.trim().is_empty() {
    return Err(NormalizedError::validation(format!("{} is required", what)));
  }
  Ok(())
}

impl Marketplace {
  pub fn favorites(&self) -> FavoriteList {
    let api = Arc::clone(&self.api);
    Query::mount("favorites", (), move |()| {
      let api = Arc::clone(&api);
      async move { api.favorites().await }
    })
    .subscribe_to(&self.favorites_bus)
  }

  pub fn favorite_detail(&self, id: impl Into<String>) -> FavoriteDetail {
    let api = Arc::clone(&self.api);
    Query::mount("favorite detail", id.into(), move |id: String| {
      let api = Arc::clone(&api);
      async move {
        require(&id, "Favorite id")?;
        api.favorite(&id).await
      }
    })
  }

  /// Bookmark a user. Input is the target user's id.
  pub fn add_favorite(&self) -> Mutation<String, Favorite> {
    let api = Arc::clone(&self.api);
    Mutation::new("add favorite", move |user_id: String| {
      let api = Arc::clone(&api);
      async move {
        require(&user_id, "User id")?;
        api.add_favorite(&user_id).await
      }
    })
    .broadcasting_to(&self.favorites_bus)
  }

  /// Delete a favorite record. Input is the favorite's own id.
  pub fn remove_favorite(&self) -> Mutation<String, ()> {
    let api = Arc::clone(&self.api);
    Mutation::new("remove favorite", move |id: String| {
      let api = Arc::clone(&api);
      async move {
        require(&id, "Favorite id")?;
        api.remove_favorite(&id).await
      }
    })
    .broadcasting_to(&self.favorites_bus)
  }
}

/// The favorite record that bookmarks `user_id`, if any.
pub fn find_favorite<'a>(favorites: &'a [Favorite], user_id: &str) -> Option<&'a Favorite> {
  if user_id.is_empty() {
    return None;
  }
  favorites
    .iter()
    .find(|f| f.target_user_id.as_deref() == Some(user_id))
}

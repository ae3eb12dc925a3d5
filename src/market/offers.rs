//! Offer queries and writes.
//!
//! Both offer lists register with the offers bus, so any successful offer
//! write refreshes every mounted list. The detail query stays unregistered.

use std::sync::Arc;

use super::types::{NewOffer, Offer, OfferStatus, StatusAction};
use super::Marketplace;
use crate::error::NormalizedError;
use crate::mutation::Mutation;
use crate::query::Query;

pub type OfferList = Query<Vec<Offer>>;
pub type OfferDetail = Query<Offer, String>;

fn require_id(id: &str) -> Result<(), NormalizedError> {
  if id.trim().is_empty() {
    return Err(NormalizedError::validation("Offer id is required"));
  }
  Ok(())
}

fn validate_new_offer(offer: &NewOffer) -> Result<(), NormalizedError> {
  if offer.service_id.trim().is_empty() {
    return Err(NormalizedError::validation("A service must be selected"));
  }
  if offer.title.trim().is_empty() {
    return Err(NormalizedError::validation("Title is required"));
  }
  Ok(())
}

impl Marketplace {
  /// Every active offer on the marketplace
  pub fn active_offers(&self) -> OfferList {
    let api = Arc::clone(&self.api);
    Query::mount("active offers", (), move |()| {
      let api = Arc::clone(&api);
      async move { api.active_offers().await }
    })
    .subscribe_to(&self.offers_bus)
  }

  /// Offers published by the signed-in user
  pub fn my_offers(&self) -> OfferList {
    let api = Arc::clone(&self.api);
    Query::mount("my offers", (), move |()| {
      let api = Arc::clone(&api);
      async move { api.my_offers().await }
    })
    .subscribe_to(&self.offers_bus)
  }

  pub fn offer_detail(&self, id: impl Into<String>) -> OfferDetail {
    let api = Arc::clone(&self.api);
    Query::mount("offer detail", id.into(), move |id: String| {
      let api = Arc::clone(&api);
      async move {
        require_id(&id)?;
        api.offer(&id).await
      }
    })
  }

  pub fn create_offer(&self) -> Mutation<NewOffer, Offer> {
    let api = Arc::clone(&self.api);
    Mutation::new("create offer", move |offer: NewOffer| {
      let api = Arc::clone(&api);
      async move {
        validate_new_offer(&offer)?;
        api.create_offer(offer).await
      }
    })
    .broadcasting_to(&self.offers_bus)
  }

  pub fn delete_offer(&self) -> Mutation<String, ()> {
    let api = Arc::clone(&self.api);
    Mutation::new("delete offer", move |id: String| {
      let api = Arc::clone(&api);
      async move {
        require_id(&id)?;
        api.delete_offer(&id).await
      }
    })
    .broadcasting_to(&self.offers_bus)
  }

  pub fn pause_offer(&self) -> Mutation<String, ()> {
    let api = Arc::clone(&self.api);
    Mutation::new("pause offer", move |id: String| {
      let api = Arc::clone(&api);
      async move {
        require_id(&id)?;
        api.pause_offer(&id).await
      }
    })
    .broadcasting_to(&self.offers_bus)
  }

  pub fn reactivate_offer(&self) -> Mutation<String, ()> {
    let api = Arc::clone(&self.api);
    Mutation::new("reactivate offer", move |id: String| {
      let api = Arc::clone(&api);
      async move {
        require_id(&id)?;
        api.reactivate_offer(&id).await
      }
    })
    .broadcasting_to(&self.offers_bus)
  }

  /// Pause or reactivate depending on the status the caller last saw.
  ///
  /// Returns the write that was issued.
  pub fn toggle_offer_status(&self) -> Mutation<(String, OfferStatus), StatusAction> {
    let api = Arc::clone(&self.api);
    Mutation::new("toggle offer status", move |(id, current): (String, OfferStatus)| {
      let api = Arc::clone(&api);
      async move {
        require_id(&id)?;
        let action = current.toggle_action();
        match action {
          StatusAction::Pause => api.pause_offer(&id).await?,
          StatusAction::Reactivate => api.reactivate_offer(&id).await?,
        }
        Ok(action)
      }
    })
    .broadcasting_to(&self.offers_bus)
  }
}

//! Cross-screen data consistency layer for the T&T marketplace client.
//!
//! Screens own independent [`query::Query`] units; writes go through
//! [`mutation::Mutation`] units that broadcast on a per-domain
//! [`bus::RefetchBus`]; credit consumption patches the cached profile in place.
//! Every failure reaches callers as an [`error::NormalizedError`].

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod market;
pub mod mutation;
pub mod query;
pub mod retry;

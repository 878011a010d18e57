//! Client for the trading bot's control-plane API.
//!
//! All calls go through the [`FetchInterceptor`](crate::interceptor::FetchInterceptor),
//! so status reads get its network-first treatment (API responses are never
//! cached). Every call carries a bearer token re-read from its
//! [`TokenSource`] just before sending.

mod auth;
mod client;
mod error;
mod types;

pub use auth::TokenSource;
pub use client::{ApiClient, StatusSource};
pub use error::ApiError;
pub use types::{BotStatus, ControlResponse};

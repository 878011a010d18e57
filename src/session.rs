//! Per-login context.
//!
//! A [`Session`] is built once the credential checks out and owns everything
//! that only makes sense while signed in. Dropping out of the session through
//! [`Session::sign_out`] stops polling for good.

use std::sync::Arc;

use tracing::info;

use crate::api::{ApiClient, ApiError};
use crate::sync::{ConnectivityObserver, Intervals, SyncScheduler};

pub struct Session {
  api: Arc<ApiClient>,
  scheduler: SyncScheduler,
}

impl Session {
  /// Verify the credential and start polling.
  pub async fn sign_in(
    api: Arc<ApiClient>,
    intervals: Intervals,
    connectivity: &ConnectivityObserver,
  ) -> Result<Self, ApiError> {
    api.verify_credentials().await?;

    let scheduler = SyncScheduler::spawn(api.clone(), intervals, Some(connectivity.subscribe()));
    scheduler.start();
    info!("signed in");

    Ok(Self { api, scheduler })
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  pub fn scheduler(&self) -> &SyncScheduler {
    &self.scheduler
  }

  pub async fn sign_out(self) {
    self.scheduler.stop();
    self.scheduler.shutdown().await;
    info!("signed out");
  }
}

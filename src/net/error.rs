use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a response, from the network or from the cache fallbacks.
///
/// A non-2xx HTTP response is not a `FetchError`; callers decide what a status
/// code means.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Transport(String),

  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  #[error("Offline and no cached copy of {0}")]
  Offline(String),

  #[error("Network unavailable, request to {0} queued for replay")]
  Deferred(String),
}

impl FetchError {
  /// Whether the failure means the remote was never reached.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Offline(_))
  }
}

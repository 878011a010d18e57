//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Normalized identity of a cacheable request.
///
/// Only retrieval requests are ever cached, so the identity is `GET` plus the
/// URL without its fragment, hashed for a stable fixed-length key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(url.as_str().as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn for_request(request: &Request) -> Self {
    Self::for_url(&request.url)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// A response snapshot as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub url: String,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(url: &Url, response: Response) -> Self {
    Self {
      url: url.to_string(),
      response,
      cached_at: Utc::now(),
    }
  }
}

/// A response handed back by the interceptor, with where it came from.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub response: Response,
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Fetched {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: CacheSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// A cached copy served because the network could not answer.
  pub fn offline(entry: CacheEntry, source: CacheSource) -> Self {
    Self {
      response: entry.response,
      source,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn placeholder() -> Self {
    Self {
      response: Response::offline_page(),
      source: CacheSource::Placeholder,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// Cache hit on a cache-first request
  Cache,
  /// Network unavailable, serving the cached copy of this request
  Offline,
  /// Network unavailable, serving the cached root document for a navigation
  RootFallback,
  /// Network and cache both unavailable, synthesized offline page
  Placeholder,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "cache (offline)",
      Self::RootFallback => "cached root (offline)",
      Self::Placeholder => "offline placeholder",
    };
    f.write_str(label)
  }
}

//! URL classification into cache policy buckets.

use tracing::warn;
use url::Url;

/// Cache policy bucket for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Pre-cached application files, served cache-first.
  Static,
  /// Anything else; network-first, successful responses cached.
  DynamicCacheable,
  /// API and exchange endpoints; network-first, never written to cache.
  NetworkOnly,
}

impl ResourceClass {
  pub fn is_cache_first(self) -> bool {
    self == Self::Static
  }

  pub fn may_store(self) -> bool {
    self != Self::NetworkOnly
  }
}

/// Classifies URLs against a network-first prefix list and a static file list.
///
/// Relative entries are resolved against the application origin once, at
/// construction. Network-first entries are prefixes of the full URL; static
/// entries must match exactly (fragment ignored). Network-first wins ties.
#[derive(Debug, Clone)]
pub struct Classifier {
  network_first: Vec<String>,
  static_files: Vec<Url>,
}

impl Classifier {
  pub fn new(origin: &Url, network_first: &[String], static_files: &[String]) -> Self {
    let network_first = network_first
      .iter()
      .filter_map(|entry| resolve(origin, entry))
      .map(String::from)
      .collect();

    let static_files = static_files
      .iter()
      .filter_map(|entry| resolve(origin, entry))
      .map(without_fragment)
      .collect();

    Self {
      network_first,
      static_files,
    }
  }

  pub fn classify(&self, url: &Url) -> ResourceClass {
    let url = without_fragment(url.clone());

    if self
      .network_first
      .iter()
      .any(|prefix| url.as_str().starts_with(prefix.as_str()))
    {
      return ResourceClass::NetworkOnly;
    }

    if self.static_files.contains(&url) {
      return ResourceClass::Static;
    }

    ResourceClass::DynamicCacheable
  }
}

fn resolve(origin: &Url, entry: &str) -> Option<Url> {
  match origin.join(entry) {
    Ok(url) => Some(url),
    Err(e) => {
      warn!(entry, error = %e, "ignoring unparseable classifier entry");
      None
    }
  }
}

fn without_fragment(mut url: Url) -> Url {
  url.set_fragment(None);
  url
}

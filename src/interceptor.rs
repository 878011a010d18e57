//! Request interception with per-class cache policy.
//!
//! Every request the client makes goes through [`FetchInterceptor::handle`],
//! which picks a retrieval strategy from the URL's [`ResourceClass`]:
//!
//! - Cache-first for static files: a hit never touches the network.
//! - Network-first for everything else, with cached copies as the fallback.
//!   API and exchange responses are never written to the cache.
//!
//! Network failures are absorbed here whenever a cached copy (or, for page
//! navigations, the cached root document) can answer instead.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use url::Url;

use crate::cache::{
  CacheEntry, CacheKey, CacheSource, CacheStorage, CacheStoreManager, Fetched, Partitions,
  SqliteStorage,
};
use crate::classify::{Classifier, ResourceClass};
use crate::net::{FetchError, Request, Response, Transport};
use crate::sync::{Connectivity, ConnectivityObserver};

/// Header dropped from requests waiting for replay.
const AUTHORIZATION: &str = "Authorization";

/// Default bound on requests waiting for replay.
const DEFAULT_DEFERRED_LIMIT: usize = 32;

pub struct FetchInterceptor<S: CacheStorage = SqliteStorage> {
  transport: Arc<dyn Transport>,
  cache: Arc<CacheStoreManager<S>>,
  partitions: Partitions,
  classifier: Classifier,
  connectivity: ConnectivityObserver,
  root: Url,
  deferred: Mutex<VecDeque<Request>>,
  deferred_limit: usize,
}

impl<S: CacheStorage> FetchInterceptor<S> {
  /// Create an interceptor reading and writing only within `partitions`.
  pub fn new(
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStoreManager<S>>,
    partitions: Partitions,
    origin: &Url,
    classifier: Classifier,
    connectivity: ConnectivityObserver,
  ) -> Self {
    let mut root = origin.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);

    Self {
      transport,
      cache,
      partitions,
      classifier,
      connectivity,
      root,
      deferred: Mutex::new(VecDeque::new()),
      deferred_limit: DEFAULT_DEFERRED_LIMIT,
    }
  }

  /// Set how many failed deferrable requests are kept for replay. Zero turns
  /// deferral off and deferrable requests fail like any other.
  pub fn with_deferred_limit(mut self, limit: usize) -> Self {
    self.deferred_limit = limit;
    self
  }

  #[cfg(test)]
  pub fn partitions(&self) -> &Partitions {
    &self.partitions
  }

  pub async fn handle(&self, request: &Request) -> Result<Fetched, FetchError> {
    if !request.is_get() || !request.is_http() {
      return self.pass_through(request).await;
    }

    let class = self.classifier.classify(&request.url);
    if class.is_cache_first() {
      self.cache_first(request).await
    } else {
      self.network_first(request, class).await
    }
  }

  /// Cache-first: any cached copy wins; on a miss fetch and keep it.
  async fn cache_first(&self, request: &Request) -> Result<Fetched, FetchError> {
    let key = CacheKey::for_request(request);
    if let Some(entry) = self.lookup(&key) {
      debug!(url = %request.url, "cache hit");
      return Ok(Fetched::from_cache(entry));
    }

    debug!(url = %request.url, "cache miss, fetching");
    match self.fetch_network(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(request, &key, &response);
        }
        Ok(Fetched::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache-first fetch failed");
        if request.is_navigation() {
          return Ok(
            self
              .root_document()
              .map(|entry| Fetched::offline(entry, CacheSource::RootFallback))
              .unwrap_or_else(Fetched::placeholder),
          );
        }
        Err(e)
      }
    }
  }

  /// Network-first: the network answers when it can, cached copies otherwise.
  async fn network_first(
    &self,
    request: &Request,
    class: ResourceClass,
  ) -> Result<Fetched, FetchError> {
    let key = CacheKey::for_request(request);

    match self.fetch_network(request).await {
      Ok(response) => {
        if response.is_success() && class.may_store() {
          self.store(request, &key, &response);
        }
        Ok(Fetched::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "network failed, trying cache");

        if let Some(entry) = self.lookup(&key) {
          debug!(url = %request.url, "cache fallback");
          return Ok(Fetched::offline(entry, CacheSource::Offline));
        }

        if request.is_navigation() {
          if let Some(entry) = self.root_document() {
            return Ok(Fetched::offline(entry, CacheSource::RootFallback));
          }
        }

        Err(e)
      }
    }
  }

  /// Requests outside cache policy go straight to the wire.
  async fn pass_through(&self, request: &Request) -> Result<Fetched, FetchError> {
    let deferrable = request.deferrable && self.deferred_limit > 0;
    if deferrable && !self.connectivity.is_online() {
      return Err(self.defer(request));
    }

    match self.transport.send(request).await {
      Ok(response) => Ok(Fetched::from_network(response)),
      Err(e) if deferrable && e.is_network() => {
        warn!(url = %request.url, error = %e, "request failed, deferring");
        // Replay waits for the next transition back to online
        self.connectivity.set(Connectivity::Offline);
        Err(self.defer(request))
      }
      Err(e) => Err(e),
    }
  }

  async fn fetch_network(&self, request: &Request) -> Result<Response, FetchError> {
    if !self.connectivity.is_online() {
      return Err(FetchError::Offline(request.url.to_string()));
    }
    self.transport.send(request).await
  }

  fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.cache.lookup(
      &[
        self.partitions.static_name.as_str(),
        self.partitions.dynamic_name.as_str(),
      ],
      key,
    )
  }

  fn root_document(&self) -> Option<CacheEntry> {
    self.lookup(&CacheKey::for_url(&self.root))
  }

  fn store(&self, request: &Request, key: &CacheKey, response: &Response) {
    let entry = CacheEntry::new(&request.url, response.clone());
    if let Err(e) = self.cache.put(&self.partitions.dynamic_name, key, &entry) {
      warn!(url = %request.url, error = %e, "failed to cache response");
    }
  }

  fn queue(&self) -> MutexGuard<'_, VecDeque<Request>> {
    self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Queue a request for replay. Credentials are stripped; the replayer
  /// authorizes again with a fresh token.
  fn defer(&self, request: &Request) -> FetchError {
    let mut queue = self.queue();
    queue.push_back(request.clone().without_header(AUTHORIZATION));
    while queue.len() > self.deferred_limit {
      if let Some(dropped) = queue.pop_front() {
        warn!(url = %dropped.url, "deferred queue full, dropping oldest request");
      }
    }
    FetchError::Deferred(request.url.to_string())
  }

  pub fn deferred_len(&self) -> usize {
    self.queue().len()
  }

  /// Take every queued request, leaving the queue empty.
  pub fn take_deferred(&self) -> Vec<Request> {
    self.queue().drain(..).collect()
  }

  /// Send a replayed request straight to the transport, bypassing cache
  /// policy and deferral.
  pub async fn deliver(&self, request: &Request) -> Result<Response, FetchError> {
    self.transport.send(request).await
  }
}

//! Scripted fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::api::{ApiError, BotStatus, StatusSource};
use crate::cache::{CacheStoreManager, SqliteStorage};
use crate::classify::Classifier;
use crate::interceptor::FetchInterceptor;
use crate::net::{FetchError, Request, Response, Transport};
use crate::sync::ConnectivityObserver;

/// Transport that answers from a per-URL routing table and records every call.
#[derive(Default)]
pub struct FakeTransport {
  routes: Mutex<HashMap<String, Result<Response, FetchError>>>,
  log: Mutex<Vec<Request>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Ok(response));
  }

  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Err(FetchError::Transport("connection refused".to_string())),
    );
  }

  pub fn calls(&self) -> usize {
    self.log.lock().unwrap().len()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .log
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.log.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    self.log.lock().unwrap().push(request.clone());
    self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .unwrap_or_else(|| Err(FetchError::Transport(format!("no route to {}", request.url))))
  }
}

/// Status source that plays back a script of outcomes, repeating the last one.
pub struct ScriptedStatus {
  script: Mutex<VecDeque<Result<BotStatus, ApiError>>>,
  last: Mutex<Option<Result<BotStatus, ApiError>>>,
  calls: Mutex<Vec<Instant>>,
}

impl ScriptedStatus {
  pub fn new(script: Vec<Result<BotStatus, ApiError>>) -> Self {
    Self {
      script: Mutex::new(script.into()),
      last: Mutex::new(None),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn running(is_running: bool) -> Result<BotStatus, ApiError> {
    Ok(BotStatus {
      is_running,
      ..BotStatus::default()
    })
  }

  pub fn network_error() -> Result<BotStatus, ApiError> {
    Err(ApiError::Fetch(FetchError::Transport(
      "connection refused".to_string(),
    )))
  }

  pub fn calls(&self) -> Vec<Instant> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl StatusSource for ScriptedStatus {
  async fn fetch_status(&self) -> Result<BotStatus, ApiError> {
    self.calls.lock().unwrap().push(Instant::now());
    let next = self.script.lock().unwrap().pop_front();
    let mut last = self.last.lock().unwrap();
    if let Some(outcome) = next {
      *last = Some(outcome);
    }
    last
      .clone()
      .unwrap_or_else(|| Self::running(false))
  }
}

/// Interceptor over an empty in-memory cache.
pub fn interceptor(
  transport: Arc<FakeTransport>,
  connectivity: ConnectivityObserver,
) -> FetchInterceptor {
  let origin = Url::parse("https://bot.example.com/").unwrap();
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let cache = Arc::new(CacheStoreManager::new(storage, "crypto-bot", "test"));
  let classifier = Classifier::new(
    &origin,
    &["/api/".to_string()],
    &["/".to_string()],
  );
  FetchInterceptor::new(
    transport,
    Arc::clone(&cache),
    cache.partitions(),
    &origin,
    classifier,
    connectivity,
  )
}

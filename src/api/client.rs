use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::TokenSource;
use super::error::ApiError;
use super::types::{BotStatus, ControlResponse};
use crate::cache::Fetched;
use crate::interceptor::FetchInterceptor;
use crate::net::Request;

const STATUS_PATH: &str = "/api/status";
const START_MONITORING_PATH: &str = "/api/start-monitoring";
const STOP_ALL_PATH: &str = "/api/stop-all";
const ADD_COIN_PATH: &str = "/api/add-coin";
const REMOVE_COIN_PATH: &str = "/api/remove-coin";

/// Smallest order size the bot accepts for a new coin.
pub const MIN_ORDER_SIZE_USDT: f64 = 10.0;

/// Anything that can report the bot's current status.
#[async_trait]
pub trait StatusSource: Send + Sync {
  async fn fetch_status(&self) -> Result<BotStatus, ApiError>;
}

/// Control-plane API client.
#[derive(Clone)]
pub struct ApiClient {
  interceptor: Arc<FetchInterceptor>,
  base: Url,
  token: TokenSource,
}

impl ApiClient {
  pub fn new(interceptor: Arc<FetchInterceptor>, base: Url, token: TokenSource) -> Self {
    Self {
      interceptor,
      base,
      token,
    }
  }

  /// Check that a credential is available before a session starts.
  pub async fn verify_credentials(&self) -> Result<(), ApiError> {
    self.token.bearer().await.map(|_| ())
  }

  /// Get the bot's current status
  pub async fn status(&self) -> Result<BotStatus, ApiError> {
    let request = Request::get(self.endpoint(STATUS_PATH)?);
    let fetched = self.send(request).await?;
    Self::decode(&fetched)
  }

  /// Start monitoring the configured coins
  pub async fn start_monitoring(&self) -> Result<ControlResponse, ApiError> {
    self.control(START_MONITORING_PATH, json!({}), false).await
  }

  /// Stop all monitoring and trading.
  ///
  /// Queued for replay if the network is down; stopping late is still wanted.
  pub async fn stop_all(&self) -> Result<ControlResponse, ApiError> {
    self.control(STOP_ALL_PATH, json!({}), true).await
  }

  /// Add a coin to the watch list
  pub async fn add_coin(
    &self,
    symbol: &str,
    order_size_usdt: f64,
  ) -> Result<ControlResponse, ApiError> {
    let symbol = normalize_symbol(symbol)?;
    if !order_size_usdt.is_finite() || order_size_usdt < MIN_ORDER_SIZE_USDT {
      return Err(ApiError::InvalidInput(format!(
        "order size must be at least {} USDT",
        MIN_ORDER_SIZE_USDT
      )));
    }

    self
      .control(
        ADD_COIN_PATH,
        json!({ "symbol": symbol, "order_size_usdt": order_size_usdt }),
        false,
      )
      .await
  }

  /// Remove a coin; the bot closes any open position on it
  pub async fn remove_coin(&self, symbol: &str) -> Result<ControlResponse, ApiError> {
    let symbol = normalize_symbol(symbol)?;
    self
      .control(REMOVE_COIN_PATH, json!({ "symbol": symbol }), false)
      .await
  }

  async fn control(
    &self,
    path: &str,
    body: serde_json::Value,
    deferrable: bool,
  ) -> Result<ControlResponse, ApiError> {
    let mut request = Request::post_json(self.endpoint(path)?, &body)
      .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    if deferrable {
      request = request.deferrable();
    }

    let fetched = self.send(request).await?;
    Self::decode(&fetched)
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base
      .join(path)
      .map_err(|e| ApiError::InvalidInput(format!("bad endpoint {}: {}", path, e)))
  }

  /// Send every request queued while offline once, each with a freshly read
  /// token. Failures and rejections are dropped, not re-queued.
  ///
  /// Returns how many were accepted.
  pub async fn replay_deferred(&self) -> usize {
    let pending = self.interceptor.take_deferred();
    if pending.is_empty() {
      return 0;
    }

    info!(count = pending.len(), "replaying deferred requests");
    let mut delivered = 0;
    for request in pending {
      let url = request.url.clone();
      let request = match self.authorize(request).await {
        Ok(request) => request,
        Err(e) => {
          warn!(url = %url, error = %e, "dropping deferred request");
          continue;
        }
      };

      match self.interceptor.deliver(&request).await {
        Ok(response) if response.is_success() => {
          debug!(url = %url, status = response.status, "deferred request delivered");
          delivered += 1;
        }
        Ok(response) => {
          let err = ApiError::from_response(&response);
          warn!(url = %url, error = %err, "deferred request rejected");
        }
        Err(e) => warn!(url = %url, error = %e, "dropping deferred request"),
      }
    }
    delivered
  }

  async fn authorize(&self, request: Request) -> Result<Request, ApiError> {
    let token = self.token.bearer().await?;
    Ok(request.with_header("Authorization", format!("Bearer {}", token)))
  }

  async fn send(&self, request: Request) -> Result<Fetched, ApiError> {
    let request = self.authorize(request).await?;

    debug!(method = %request.method, url = %request.url, "api request");
    let fetched = self.interceptor.handle(&request).await?;
    if !fetched.response.is_success() {
      let err = ApiError::from_response(&fetched.response);
      warn!(url = %request.url, error = %err, "api request rejected");
      return Err(err);
    }
    Ok(fetched)
  }

  fn decode<T: DeserializeOwned>(fetched: &Fetched) -> Result<T, ApiError> {
    fetched
      .response
      .json()
      .map_err(|e| ApiError::InvalidResponse(e.to_string()))
  }
}

#[async_trait]
impl StatusSource for ApiClient {
  async fn fetch_status(&self) -> Result<BotStatus, ApiError> {
    self.status().await
  }
}

fn normalize_symbol(symbol: &str) -> Result<String, ApiError> {
  let symbol = symbol.trim().to_uppercase();
  if symbol.is_empty() {
    return Err(ApiError::InvalidInput("coin symbol must not be empty".to_string()));
  }
  Ok(symbol)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{FetchError, Response};
  use crate::sync::{replay_on_reconnect, Connectivity, ConnectivityObserver, ConnectivityProbe};
  use std::time::Duration;
  use tokio_util::sync::CancellationToken;
  use crate::testing::{self, FakeTransport};

  const STATUS: &str = "https://bot.example.com/api/status";
  const STOP_ALL: &str = "https://bot.example.com/api/stop-all";
  const ADD_COIN: &str = "https://bot.example.com/api/add-coin";
  const ROOT: &str = "https://bot.example.com/";

  struct Fixture {
    _dir: tempfile::TempDir,
    token: std::path::PathBuf,
    transport: Arc<FakeTransport>,
    connectivity: ConnectivityObserver,
    client: ApiClient,
  }

  fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let token = dir.path().join("token");
    std::fs::write(&token, "secret-token").unwrap();

    let transport = Arc::new(FakeTransport::new());
    let connectivity = ConnectivityObserver::new(Connectivity::Online);
    let interceptor = testing::interceptor(transport.clone(), connectivity.clone());
    let client = ApiClient::new(
      Arc::new(interceptor),
      Url::parse("https://bot.example.com/").unwrap(),
      TokenSource::File(token.clone()),
    );

    Fixture {
      _dir: dir,
      token,
      transport,
      connectivity,
      client,
    }
  }

  #[tokio::test]
  async fn test_status_sends_bearer_token() {
    let f = fixture();
    f.transport.respond(
      STATUS,
      Response::new(200, r#"{"is_running":true,"total_balance":100.0}"#),
    );

    let status = f.client.status().await.unwrap();
    assert!(status.is_running);

    let request = &f.transport.requests()[0];
    assert!(request
      .headers
      .contains(&("Authorization".to_string(), "Bearer secret-token".to_string())));
  }

  #[tokio::test]
  async fn test_status_failure_status_is_an_error() {
    let f = fixture();
    f.transport
      .respond(STATUS, Response::new(503, r#"{"detail":"maintenance"}"#));

    let err = f.client.status().await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected { status: 503, .. }));
  }

  #[tokio::test]
  async fn test_add_coin_validates_and_posts() {
    let f = fixture();
    f.transport.respond(
      ADD_COIN,
      Response::new(200, r#"{"message":"ok","status":{"is_running":true}}"#),
    );

    assert!(matches!(
      f.client.add_coin("  ", 50.0).await,
      Err(ApiError::InvalidInput(_))
    ));
    assert!(matches!(
      f.client.add_coin("btcusdt", 5.0).await,
      Err(ApiError::InvalidInput(_))
    ));
    assert_eq!(f.transport.calls(), 0);

    let response = f.client.add_coin("btcusdt", 50.0).await.unwrap();
    assert!(response.status.is_running);

    let request = &f.transport.requests()[0];
    let body: serde_json::Value =
      serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["symbol"], "BTCUSDT");
    assert_eq!(body["order_size_usdt"], 50.0);
  }

  #[tokio::test]
  async fn test_stop_all_is_deferred_while_offline() {
    let f = fixture();
    f.connectivity.set(Connectivity::Offline);

    let err = f.client.stop_all().await.unwrap_err();
    assert!(matches!(err, ApiError::Fetch(FetchError::Deferred(_))));
    assert_eq!(f.transport.calls_to(STOP_ALL), 0);
  }

  #[tokio::test]
  async fn test_status_offline_fails_fast() {
    let f = fixture();
    f.connectivity.set(Connectivity::Offline);

    let err = f.client.fetch_status().await.unwrap_err();
    assert!(matches!(err, ApiError::Fetch(FetchError::Offline(_))));
    assert_eq!(f.transport.calls(), 0);
  }

  fn last_authorization(transport: &FakeTransport, url: &str) -> Option<String> {
    transport
      .requests()
      .iter()
      .rev()
      .find(|r| r.url.as_str() == url)
      .and_then(|r| {
        r.headers
          .iter()
          .find(|(n, _)| n == "Authorization")
          .map(|(_, v)| v.clone())
      })
  }

  #[tokio::test]
  async fn test_replay_reads_a_fresh_token() {
    let f = fixture();
    std::fs::write(&f.token, "old-token").unwrap();
    f.connectivity.set(Connectivity::Offline);
    assert!(f.client.stop_all().await.is_err());

    std::fs::write(&f.token, "new-token").unwrap();
    f.connectivity.set(Connectivity::Online);
    f.transport.respond(
      STOP_ALL,
      Response::new(200, r#"{"status":{"is_running":false}}"#),
    );

    assert_eq!(f.client.replay_deferred().await, 1);
    assert_eq!(
      last_authorization(&f.transport, STOP_ALL).as_deref(),
      Some("Bearer new-token")
    );
    assert_eq!(f.client.replay_deferred().await, 0);
  }

  #[tokio::test]
  async fn test_rejected_replay_is_not_delivered() {
    let f = fixture();
    f.connectivity.set(Connectivity::Offline);
    assert!(f.client.stop_all().await.is_err());

    f.connectivity.set(Connectivity::Online);
    f.transport
      .respond(STOP_ALL, Response::new(401, r#"{"detail":"token expired"}"#));

    assert_eq!(f.client.replay_deferred().await, 0);
    assert_eq!(f.transport.calls_to(STOP_ALL), 1);
    // Dropped, not re-queued
    assert_eq!(f.client.replay_deferred().await, 0);
    assert_eq!(f.transport.calls_to(STOP_ALL), 1);
  }

  #[tokio::test]
  async fn test_transient_failure_replays_after_next_probe() {
    let f = fixture();
    let client = Arc::new(f.client.clone());
    let shutdown = CancellationToken::new();
    let replayer = tokio::spawn(replay_on_reconnect(
      client.clone(),
      f.connectivity.subscribe(),
      shutdown.clone(),
    ));

    // Fails while the observer still believes we are online
    f.transport.fail(STOP_ALL);
    let err = client.stop_all().await.unwrap_err();
    assert!(matches!(err, ApiError::Fetch(FetchError::Deferred(_))));
    assert!(!f.connectivity.is_online());

    f.transport.respond(ROOT, Response::new(200, "<html></html>"));
    f.transport.respond(
      STOP_ALL,
      Response::new(200, r#"{"status":{"is_running":false}}"#),
    );
    let probe = ConnectivityProbe::new(
      f.transport.clone(),
      Url::parse(ROOT).unwrap(),
      Duration::from_secs(15),
      f.connectivity.clone(),
    );
    assert_eq!(probe.check().await, Connectivity::Online);

    tokio::time::timeout(Duration::from_secs(5), async {
      while f.transport.calls_to(STOP_ALL) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .unwrap();

    shutdown.cancel();
    replayer.await.unwrap();
  }
}

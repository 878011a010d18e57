use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::trace;

use super::error::FetchError;
use super::request::{Request, Response};

/// Something that can put a request on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Send a request. Any HTTP response, including error statuses, is `Ok`.
  async fn send(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `reqwest`-backed transport with a hard timeout on every request.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  timeout: Duration,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("botwatch/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, timeout })
  }

  fn map_error(&self, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
      FetchError::Timeout(self.timeout)
    } else {
      FetchError::Transport(e.to_string())
    }
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    trace!(method = %request.method, url = %request.url, "sending request");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| self.map_error(e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(|e| self.map_error(e))?;

    Ok(Response {
      headers,
      ..Response::new(status, body.to_vec())
    })
  }
}

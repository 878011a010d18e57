use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// What the response to a request is going to be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// A top-level page navigation; may be answered with the cached root document.
  Document,
  #[default]
  Other,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Queue for replay on reconnect if the network is unreachable.
  pub deferrable: bool,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Other,
      headers: Vec::new(),
      body: None,
      deferrable: false,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page navigation (`GET`, document destination).
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  /// A `POST` carrying a JSON body.
  pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> serde_json::Result<Self> {
    let body = serde_json::to_vec(body)?;
    Ok(
      Self::new(Method::POST, url)
        .with_header("Content-Type", "application/json")
        .with_body(body),
    )
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Drop every header called `name` (case-insensitive).
  pub fn without_header(mut self, name: &str) -> Self {
    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn deferrable(mut self) -> Self {
    self.deferrable = true;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  /// Only plain http(s) traffic is subject to cache policy.
  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }
}

/// A captured HTTP response. Immutable once built; cache entries hold these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// The placeholder served for a navigation when neither network nor cache can answer.
  pub fn offline_page() -> Self {
    Self {
      status: 503,
      headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
      body: b"Offline - Please check your connection".to_vec(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

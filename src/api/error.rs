use serde::Deserialize;
use thiserror::Error;

use crate::net::{FetchError, Response};

#[derive(Error, Debug, Clone)]
pub enum ApiError {
  #[error("Unauthorized: {0}")]
  Unauthorized(String),

  #[error("Request rejected ({status}): {detail}")]
  Rejected { status: u16, detail: String },

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Credential unavailable: {0}")]
  Credential(String),

  #[error("Invalid input: {0}")]
  InvalidInput(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error envelope returned by the control endpoints.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  detail: String,
}

impl ApiError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      body.to_string()
    } else {
      let mut end = MAX_ERROR_BODY_LENGTH;
      while !body.is_char_boundary(end) {
        end -= 1;
      }
      format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
  }

  /// Build an error from a non-2xx response, preferring the `{ detail }` envelope.
  pub fn from_response(response: &Response) -> Self {
    let detail = match response.json::<ErrorEnvelope>() {
      Ok(envelope) => envelope.detail,
      Err(_) => Self::truncate_body(&response.text()),
    };

    match response.status {
      401 | 403 => ApiError::Unauthorized(detail),
      status => ApiError::Rejected { status, detail },
    }
  }

  pub fn is_auth(&self) -> bool {
    matches!(self, Self::Unauthorized(_) | Self::Credential(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_detail_envelope_is_preferred() {
    let response = Response::new(400, r#"{"detail":"Bot zaten çalışıyor"}"#);
    match ApiError::from_response(&response) {
      ApiError::Rejected { status, detail } => {
        assert_eq!(status, 400);
        assert_eq!(detail, "Bot zaten çalışıyor");
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_auth_statuses_map_to_unauthorized() {
    let err = ApiError::from_response(&Response::new(401, r#"{"detail":"token expired"}"#));
    assert!(matches!(err, ApiError::Unauthorized(ref d) if d == "token expired"));
    assert!(err.is_auth());
  }

  #[test]
  fn test_plain_body_is_truncated() {
    let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 100);
    let err = ApiError::from_response(&Response::new(502, body));
    let message = err.to_string();
    assert!(message.contains("truncated"));
    assert!(message.len() < MAX_ERROR_BODY_LENGTH + 100);
  }
}

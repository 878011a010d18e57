use std::path::PathBuf;

use super::error::ApiError;

/// Where the bearer credential comes from.
///
/// The credential is issued and refreshed by an external identity provider;
/// this client only reads it, and reads it again before every call so a
/// refreshed token is picked up without a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
  /// Environment variable holding the token.
  Env(String),
  /// File whose trimmed contents are the token.
  File(PathBuf),
}

impl TokenSource {
  pub async fn bearer(&self) -> Result<String, ApiError> {
    let token = match self {
      Self::Env(var) => std::env::var(var)
        .map_err(|_| ApiError::Credential(format!("environment variable {} is not set", var)))?,
      Self::File(path) => tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ApiError::Credential(format!("failed to read {}: {}", path.display(), e)))?,
    };

    let token = token.trim();
    if token.is_empty() {
      return Err(ApiError::Credential("token is empty".to_string()));
    }
    Ok(token.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_file_token_is_reread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    let source = TokenSource::File(path.clone());

    std::fs::write(&path, "first\n").unwrap();
    assert_eq!(source.bearer().await.unwrap(), "first");

    std::fs::write(&path, "second").unwrap();
    assert_eq!(source.bearer().await.unwrap(), "second");
  }

  #[tokio::test]
  async fn test_missing_credentials() {
    let source = TokenSource::Env("BOTWATCH_TEST_TOKEN_THAT_IS_NEVER_SET".to_string());
    assert!(matches!(source.bearer().await, Err(ApiError::Credential(_))));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty");
    std::fs::write(&path, "  \n").unwrap();
    assert!(TokenSource::File(path).bearer().await.is_err());
  }
}

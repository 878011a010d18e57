use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::api::TokenSource;
use crate::sync::Intervals;

/// Environment variable read for the bearer token when no file is configured.
const DEFAULT_TOKEN_ENV: &str = "BOTWATCH_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub polling: PollingConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Origin serving the dashboard and its API
  pub url: Url,
  /// Environment variable holding the bearer token
  #[serde(default = "default_token_env")]
  pub token_env: String,
  /// File holding the bearer token (takes precedence over `token_env`)
  pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition name prefix
  pub prefix: String,
  /// Cache version; bumping it invalidates every stored response
  pub version: Option<String>,
  /// Activate a freshly primed version immediately
  pub skip_waiting: bool,
  /// Files primed at install and served cache-first
  pub static_files: Vec<String>,
  /// Prefixes always fetched from the network and never stored
  pub network_first: Vec<String>,
  /// Failed control requests kept for replay on reconnect
  pub deferred_limit: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "crypto-bot".to_string(),
      version: None,
      skip_waiting: true,
      static_files: [
        "/",
        "/static/style.css",
        "/static/script.js",
        "/static/manifest.json",
        "https://www.gstatic.com/firebasejs/8.6.1/firebase-app.js",
        "https://www.gstatic.com/firebasejs/8.6.1/firebase-auth.js",
        "https://www.gstatic.com/firebasejs/8.6.1/firebase-database.js",
        "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;700&display=swap",
      ]
      .map(String::from)
      .to_vec(),
      network_first: [
        "/api/",
        "https://fapi.binance.com/",
        "https://testnet.binancefuture.com/",
        "https://fstream.binance.com/",
        "https://stream.binancefuture.com/",
      ]
      .map(String::from)
      .to_vec(),
      deferred_limit: 32,
    }
  }
}

impl CacheConfig {
  pub fn version(&self) -> &str {
    self.version.as_deref().unwrap_or(env!("CARGO_PKG_VERSION"))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
  #[serde(deserialize_with = "deserialize_duration")]
  pub running: Duration,
  #[serde(deserialize_with = "deserialize_duration")]
  pub stopped: Duration,
  #[serde(deserialize_with = "deserialize_duration")]
  pub retry: Duration,
  /// Ceiling on every network fetch
  #[serde(deserialize_with = "deserialize_duration")]
  pub fetch_timeout: Duration,
}

impl Default for PollingConfig {
  fn default() -> Self {
    let intervals = Intervals::default();
    Self {
      running: intervals.running,
      stopped: intervals.stopped,
      retry: intervals.retry,
      fetch_timeout: Duration::from_secs(10),
    }
  }
}

impl PollingConfig {
  pub fn intervals(&self) -> Intervals {
    Intervals {
      running: self.running,
      stopped: self.stopped,
      retry: self.retry,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// URL probed to detect connectivity (defaults to the API origin)
  pub probe_url: Option<Url>,
  #[serde(deserialize_with = "deserialize_duration")]
  pub probe_interval: Duration,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      probe_interval: Duration::from_secs(15),
    }
  }
}

fn default_token_env() -> String {
  DEFAULT_TOKEN_ENV.to_string()
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Seconds(u64),
    Text(String),
  }

  match Raw::deserialize(deserializer)? {
    Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
  }
}

/// Parse durations like `500ms`, `10s`, `2m` or `1h`. A bare number is seconds.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
  let text = text.trim();
  let split = text
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(text.len());
  let (number, unit) = text.split_at(split);

  let value: u64 = number
    .parse()
    .map_err(|_| format!("invalid duration {:?}", text))?;

  let secs = |scale: u64| {
    value
      .checked_mul(scale)
      .map(Duration::from_secs)
      .ok_or_else(|| format!("duration out of range: {:?}", text))
  };

  match unit.trim() {
    "ms" => Ok(Duration::from_millis(value)),
    "" | "s" => Ok(Duration::from_secs(value)),
    "m" => secs(60),
    "h" => secs(3600),
    other => Err(format!("unknown duration unit {:?} in {:?}", other, text)),
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./botwatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/botwatch/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/botwatch/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("botwatch.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("botwatch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.polling.intervals().validate()?;
    if self.polling.fetch_timeout.is_zero() {
      return Err(eyre!("fetch_timeout must be greater than zero"));
    }
    if !matches!(self.api.url.scheme(), "http" | "https") {
      return Err(eyre!("api.url must be an http(s) URL: {}", self.api.url));
    }
    Ok(())
  }

  pub fn token_source(&self) -> TokenSource {
    match &self.api.token_file {
      Some(path) => TokenSource::File(expand_home(path)),
      None => TokenSource::Env(self.api.token_env.clone()),
    }
  }

  pub fn probe_url(&self) -> Url {
    self
      .connectivity
      .probe_url
      .clone()
      .unwrap_or_else(|| self.api.url.clone())
  }
}

fn expand_home(path: &Path) -> PathBuf {
  match (path.strip_prefix("~"), dirs::home_dir()) {
    (Ok(rest), Some(home)) => home.join(rest),
    _ => path.to_path_buf(),
  }
}

/// Directory for the response cache and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("botwatch"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("api:\n  url: https://bot.example.com\n").unwrap();

    assert_eq!(config.cache.prefix, "crypto-bot");
    assert_eq!(config.cache.version(), env!("CARGO_PKG_VERSION"));
    assert!(config.cache.static_files.contains(&"/".to_string()));
    assert_eq!(config.polling.intervals(), Intervals::default());
    assert_eq!(config.token_source(), TokenSource::Env("BOTWATCH_TOKEN".to_string()));
    assert_eq!(config.probe_url(), config.api.url);
  }

  #[test]
  fn test_humane_durations() {
    let config = Config::from_yaml(
      r#"
api:
  url: https://bot.example.com
  token_file: /run/botwatch/token
polling:
  running: 5s
  stopped: 1m
  retry: 500ms
  fetch_timeout: 8
"#,
    )
    .unwrap();

    assert_eq!(config.polling.running, Duration::from_secs(5));
    assert_eq!(config.polling.stopped, Duration::from_secs(60));
    assert_eq!(config.polling.retry, Duration::from_millis(500));
    assert_eq!(config.polling.fetch_timeout, Duration::from_secs(8));
    assert_eq!(
      config.token_source(),
      TokenSource::File(PathBuf::from("/run/botwatch/token"))
    );
  }

  #[test]
  fn test_rejects_misordered_intervals() {
    let err = Config::from_yaml(
      r#"
api:
  url: https://bot.example.com
polling:
  running: 30s
  stopped: 10s
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("stopped interval"));
  }

  #[test]
  fn test_parse_duration_errors() {
    assert!(parse_duration("ten seconds").is_err());
    assert!(parse_duration("10d").is_err());
    assert_eq!(parse_duration(" 2h "), Ok(Duration::from_secs(7200)));
  }

  #[test]
  fn test_huge_durations_are_rejected() {
    assert!(parse_duration("6000000000000000h")
      .unwrap_err()
      .contains("out of range"));
    assert!(parse_duration("400000000000000000m").is_err());

    let err = Config::from_yaml(
      "api:\n  url: https://bot.example.com\npolling:\n  stopped: 6000000000000000h\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("out of range"));
  }
}

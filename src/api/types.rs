use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot returned by the status endpoint and embedded in control responses.
///
/// Only `is_running` is required; known telemetry fields are typed and
/// everything else is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
  pub is_running: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status_message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_balance: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_positions: Option<u64>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub active_coins: Map<String, Value>,
  #[serde(flatten)]
  pub telemetry: Map<String, Value>,
}

impl BotStatus {
  pub fn summary(&self) -> String {
    let state = if self.is_running { "running" } else { "stopped" };
    let mut parts = vec![state.to_string()];
    if let Some(balance) = self.total_balance {
      parts.push(format!("{:.2} USDT", balance));
    }
    parts.push(format!("{} coins", self.active_coins.len()));
    if let Some(positions) = self.total_positions {
      parts.push(format!("{} positions", positions));
    }
    if let Some(message) = &self.status_message {
      parts.push(message.clone());
    }
    parts.join(" | ")
  }
}

/// Body returned by the control endpoints on success.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
  #[serde(default)]
  pub message: Option<String>,
  pub status: BotStatus,
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::monitor::MonitorSettings;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Workspace the monitored task lives in. Can also be passed with `--workspace`.
    #[serde(default)]
    pub workspace_id: Option<String>,

    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,

    #[serde(default = "default_flow_poll_ms")]
    pub flow_poll_ms: u64,

    #[serde(default = "default_flow_timeout_ms")]
    pub flow_timeout_ms: u64,

    /// One of trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_url() -> String {
    "http://localhost:8855".to_string()
}
fn default_status_poll_ms() -> u64 {
    1000
}
fn default_flow_poll_ms() -> u64 {
    200
}
fn default_flow_timeout_ms() -> u64 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            workspace_id: None,
            status_poll_ms: default_status_poll_ms(),
            flow_poll_ms: default_flow_poll_ms(),
            flow_timeout_ms: default_flow_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join("config.toml");
        if !config_path.exists() {
            info!("No config.toml found, using defaults.");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        info!(
            "Loaded client config: api_url={}, workspace={:?}, status_poll={}ms",
            config.api_url, config.workspace_id, config.status_poll_ms
        );
        Ok(config)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            status_interval: Duration::from_millis(self.status_poll_ms.max(1)),
            flow_poll_interval: Duration::from_millis(self.flow_poll_ms.max(1)),
            flow_timeout: Duration::from_millis(self.flow_timeout_ms),
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(
            config.monitor_settings().flow_timeout,
            Duration::from_secs(3)
        );
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "api_url = \"http://10.0.0.2:9000\"\nworkspace_id = \"ws_1\"\nlog_level = \"debug\"\n",
        )
        .unwrap();
        let config = ClientConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.api_url, "http://10.0.0.2:9000");
        assert_eq!(config.workspace_id.as_deref(), Some("ws_1"));
        assert_eq!(config.status_poll_ms, 1000);
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "api_url = [").unwrap();
        assert!(ClientConfig::load(dir.path()).await.is_err());
    }
}

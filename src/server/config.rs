//! Server configuration.
//!
//! Everything is overridable through `FORGEWATCH_*` environment
//! variables (e.g. `FORGEWATCH_PORT=9000`); unset values fall back to
//! the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;

use forgewatch_core::{MACHINE_DATA_TOPIC, PREDICTION_DATA_TOPIC};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP/WebSocket port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Partition count for newly provisioned topics.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Per-partition retention window (records).
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Topic carrying raw readings.
    #[serde(default = "default_machine_topic")]
    pub machine_topic: String,
    /// Topic carrying enriched results.
    #[serde(default = "default_prediction_topic")]
    pub prediction_topic: String,
    /// Edge node tick interval in milliseconds.
    #[serde(default = "default_edge_interval_ms")]
    pub edge_interval_ms: u64,
    /// Heartbeat/liveness sweep interval in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_partitions() -> usize {
    5
}

fn default_retention() -> usize {
    forgewatch_bus::DEFAULT_RETENTION
}

fn default_machine_topic() -> String {
    MACHINE_DATA_TOPIC.to_string()
}

fn default_prediction_topic() -> String {
    PREDICTION_DATA_TOPIC.to_string()
}

fn default_edge_interval_ms() -> u64 {
    500
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            partitions: default_partitions(),
            retention: default_retention(),
            machine_topic: default_machine_topic(),
            prediction_topic: default_prediction_topic(),
            edge_interval_ms: default_edge_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let source = config::Config::builder()
            .add_source(config::Environment::with_prefix("FORGEWATCH").try_parsing(true))
            .build()
            .context("Failed to read environment configuration")?;
        source
            .try_deserialize()
            .context("Invalid FORGEWATCH_* configuration value")
    }

    /// Address the HTTP listener binds.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.partitions, 5);
        assert_eq!(cfg.machine_topic, "machine-data");
        assert_eq!(cfg.prediction_topic, "prediction-data");
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
    }
}

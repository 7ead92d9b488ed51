use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::Deserialize;

use crate::common::node::Endpoint;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub sync_interval_secs: u64,
    /// Offsets beyond +/- this bound are left out of the round average.
    pub max_offset_ms: u64,
    /// Unset means network calls may block forever.
    pub io_timeout_ms: Option<u64>,
    /// Unset means one task per connection with no cap.
    pub max_connections: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4956,
            sync_interval_secs: 3,
            max_offset_ms: 5000,
            io_timeout_ms: None,
            max_connections: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn max_offset(&self) -> Result<TimeDelta> {
        TimeDelta::from_std(Duration::from_millis(self.max_offset_ms))
            .context("max_offset_ms out of range")
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub coordinator_host: String,
    pub coordinator_port: u16,
    pub host: String,
    /// The node listens on `base_port + id`.
    pub base_port: u16,
    pub announce_interval_secs: u64,
    pub announce_retry_ms: u64,
    pub io_timeout_ms: Option<u64>,
    pub max_connections: Option<usize>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            coordinator_host: "127.0.0.1".to_string(),
            coordinator_port: 4956,
            host: "127.0.0.1".to_string(),
            base_port: 4850,
            announce_interval_secs: 10,
            announce_retry_ms: 1000,
            io_timeout_ms: None,
            max_connections: None,
        }
    }
}

impl NodeConfig {
    pub fn coordinator(&self) -> Endpoint {
        Endpoint::new(self.coordinator_host.clone(), self.coordinator_port)
    }

    pub fn listen_endpoint(&self, node_id: u16) -> Result<Endpoint> {
        let port = self
            .base_port
            .checked_add(node_id)
            .with_context(|| format!("node id {} overflows base port {}", node_id, self.base_port))?;
        Ok(Endpoint::new(self.host.clone(), port))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn announce_retry_delay(&self) -> Duration {
        Duration::from_millis(self.announce_retry_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

pub fn load_coordinator_config(path: &str) -> Result<CoordinatorConfig> {
    load_config(path, "CLOCKSYNC_COORDINATOR")
}

pub fn load_node_config(path: &str) -> Result<NodeConfig> {
    load_config(path, "CLOCKSYNC_NODE")
}

// Optional file, overridden by `<prefix>_<FIELD>` environment variables (.env honoured).
fn load_config<T>(path: &str, env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    dotenv::dotenv().ok();
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
        .build()
        .with_context(|| format!("failed to read configuration from {}", path))?;
    let config = settings
        .try_deserialize()
        .with_context(|| format!("invalid configuration in {}", path))?;
    Ok(config)
}

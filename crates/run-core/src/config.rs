//! run.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working single-node configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub runtime: RuntimeConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Largest request body the gateway will buffer.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/run/run.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Deadline for resolving a deployment to a sandbox instance.
    pub ask_timeout_ms: u64,
    /// Pending requests a single sandbox instance will queue.
    pub mailbox_capacity: usize,
    /// Tear down instances idle this long. `0` keeps them forever.
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Linear memory cap per invocation.
    pub memory_limit_bytes: usize,
    /// Capacity of the captured guest stdout.
    pub stdout_capacity_bytes: usize,
    /// Instruction budget per invocation; unlimited when absent.
    pub fuel: Option<u64>,
    /// Wall-clock budget for one guest invocation.
    pub invoke_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ask_timeout_ms: 5_000,
            mailbox_capacity: 64,
            idle_timeout_secs: 600,
            sweep_interval_secs: 30,
            memory_limit_bytes: 64 * 1024 * 1024,
            stdout_capacity_bytes: 4 * 1024 * 1024,
            fuel: None,
            invoke_timeout_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: RunConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.addr.port(), 8080);
        assert_eq!(config.runtime.ask_timeout(), Duration::from_secs(5));
        assert_eq!(config.runtime.mailbox_capacity, 64);
        assert!(config.runtime.fuel.is_none());
        assert_eq!(config.runtime.invoke_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parse_partial_runtime_section() {
        let toml_str = r#"
[server]
addr = "127.0.0.1:9000"

[runtime]
ask_timeout_ms = 250
idle_timeout_secs = 0
fuel = 1000000
"#;
        let config: RunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.addr.port(), 9000);
        assert_eq!(config.runtime.ask_timeout(), Duration::from_millis(250));
        assert!(config.runtime.idle_timeout().is_none());
        assert_eq!(config.runtime.fuel, Some(1_000_000));
        // Untouched fields keep their defaults.
        assert_eq!(config.runtime.memory_limit_bytes, 64 * 1024 * 1024);
        assert_eq!(config.metrics.interval_secs, 60);
    }

    #[test]
    fn from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        let config = RunConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = RunConfig::from_file(&path).unwrap();
        assert_eq!(loaded.state.path, config.state.path);
        assert_eq!(loaded.runtime.idle_timeout(), Some(Duration::from_secs(600)));
    }
}

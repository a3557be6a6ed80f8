use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_WORKER: usize = 1024;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: &str = "1883";

/// Broker configuration, immutable once the broker is constructed.
///
/// Serde defaults are the zero values on purpose: a config file may omit any
/// field and [`BrokerConfig::check`] fills in the effective defaults, so an
/// omitted `workerNum` ends up at 1024 rather than the binary default.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Worker-pool concurrency, prefer (client count)/10.
    #[serde(rename = "workerNum", default)]
    pub worker: usize,
    #[serde(default)]
    pub host: String,
    /// TCP port to listen on; empty disables the listener.
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub debug: bool,
}

impl Default for BrokerConfig {
    /// The binary default. Note the long-standing worker divergence: the
    /// binary default is 4096 while the CLI flag defaults to 1024.
    fn default() -> Self {
        Self {
            worker: 4096,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            debug: false,
        }
    }
}

impl BrokerConfig {
    /// Load a JSON config file. A file, when given, replaces CLI-parsed
    /// values wholesale.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Normalize missing values to the effective defaults.
    pub fn check(&mut self) {
        if self.worker == 0 {
            self.worker = DEFAULT_WORKER;
        }
        if !self.port.is_empty() && self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
    }
}

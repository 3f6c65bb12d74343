use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Polling faster than this is pointless; use the watch strategy instead.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// How the SDK learns about new configuration
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStrategy {
    /// Tail the store's change feed directly, falling back to API polling
    Watch,
    /// Poll `GetCurrent` directly on the store, falling back to API polling
    DbPoll,
    /// Poll `Info` through an injected RPC client
    RpcPoll,
    /// Poll `Info` through the HTTP binding
    #[default]
    HttpPoll,
}

impl fmt::Display for DeliveryStrategy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            DeliveryStrategy::Watch => "watch",
            DeliveryStrategy::DbPoll => "db_poll",
            DeliveryStrategy::RpcPoll => "rpc_poll",
            DeliveryStrategy::HttpPoll => "http_poll",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SdkConfig {
    /// Group of the application this process runs as
    #[serde(default)]
    pub group: String,

    /// Name of the application this process runs as
    #[serde(default)]
    pub app: String,

    /// Directory receiving `AppConfig.json` and `SourceConfig.json`
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default)]
    pub strategy: DeliveryStrategy,

    /// Interval between two poll rounds (poll strategies and fallback)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hard deadline for the first fetch
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,

    /// HTTP binding endpoints, e.g. `http://config-service:8000`
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Per-request timeout of the HTTP client
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            group: String::new(),
            app: String::new(),
            config_dir: default_config_dir(),
            strategy: DeliveryStrategy::default(),
            poll_interval_ms: default_poll_interval_ms(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            endpoints: vec![],
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SdkConfig {
    pub fn new(
        group: impl Into<String>,
        app: impl Into<String>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            group: group.into(),
            app: app.into(),
            config_dir: config_dir.into(),
            ..Default::default()
        }
    }

    /// Effective poll interval, never below [`MIN_POLL_INTERVAL_MS`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.group.is_empty() || self.app.is_empty() {
            return Err(Error::InvalidConfig(
                "sdk.group and sdk.app cannot be empty".into(),
            ));
        }
        if self.config_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "sdk.config_dir cannot be empty".into(),
            ));
        }
        if self.bootstrap_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "sdk.bootstrap_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "sdk.request_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.strategy == DeliveryStrategy::HttpPoll && self.endpoints.is_empty() {
            return Err(Error::InvalidConfig(
                "sdk.endpoints must contain at least one address for http_poll".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("./")
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_bootstrap_timeout_ms() -> u64 {
    3000
}
fn default_request_timeout_ms() -> u64 {
    1000
}

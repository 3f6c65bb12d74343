//! Configuration management module for the configuration service.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`DCONFIG__` prefix, highest priority)
//! - Component-wise validation
mod retry;
mod sdk;
mod server;
mod storage;
pub use retry::*;
pub use sdk::*;
pub use server::*;
pub use storage::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "DCONFIG";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    /// Backing store location and allocation protocol
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP binding and request deadlines
    #[serde(default)]
    pub server: ServerConfig,
    /// Client SDK settings, used by processes embedding the reconciler
    #[serde(default)]
    pub sdk: SdkConfig,
    /// Retry policies for bootstrap, polling and feed reconnects
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Debug for ServiceConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("storage", &self.storage)
            .field("server", &self.server)
            .finish()
    }
}

impl ServiceConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/service.toml");
    /// std::env::set_var("DCONFIG__STORAGE__ALLOCATION", "ordered");
    /// let cfg = ServiceConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    /// Validates the server side sections and returns the validated instance.
    ///
    /// The `sdk` section is validated by the reconciler that consumes it, since a
    /// server process does not need one.
    pub fn validate(self) -> Result<Self> {
        self.storage.validate()?;
        self.server.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

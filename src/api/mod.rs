//! Transport-agnostic configuration API and its HTTP binding.
//!
//! [`ConfigApi`] is the surface clients talk to. [`ConfigService`] implements
//! it in-process on top of a [`crate::ConfigStore`]; [`HttpConfigClient`]
//! implements it over the HTTP binding served by [`config_routes`].
mod http;
mod service;

pub use http::*;
pub use service::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::ConfigSnapshot;
use crate::Result;
use crate::VersionRecord;
use crate::WatchCredentials;

/// Answer of [`ConfigApi::info`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InfoResponse {
    NotExist,
    Unchanged { op_num: u64 },
    Current(ConfigSnapshot),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    pub group: String,
    pub app: String,
    #[serde(default)]
    pub op_num: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    pub group: String,
    pub app: String,
    #[serde(default)]
    pub app_config: String,
    #[serde(default)]
    pub source_config: String,
}

/// Body of both `rollback` and `get`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub group: String,
    pub app: String,
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsRequest {
    pub group: String,
}

/// Error body of the HTTP binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub msg: String,
    /// Offending payload field of a format error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigApi: Send + Sync + 'static {
    /// Current configuration, or `Unchanged` when the caller already holds `op_num`.
    async fn info(
        &self,
        group: &str,
        app: &str,
        op_num: u64,
    ) -> Result<InfoResponse>;

    async fn set(
        &self,
        group: &str,
        app: &str,
        app_config: &str,
        source_config: &str,
    ) -> Result<()>;

    async fn rollback(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<()>;

    async fn get(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<VersionRecord>;

    async fn groups(&self) -> Result<Vec<String>>;

    async fn apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>>;

    /// All-empty credentials mean direct watching is unsupported.
    async fn get_watch_addr(&self) -> Result<WatchCredentials>;

    async fn set_watch_addr(
        &self,
        credentials: WatchCredentials,
    ) -> Result<()>;
}

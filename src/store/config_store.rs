use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::instrument;

use crate::metrics::CONFIG_MUTATIONS;
use crate::validate_name;
use crate::AllocationMode;
use crate::AppKey;
use crate::Error;
use crate::PointerRecord;
use crate::Result;
use crate::StorageError;
use crate::VersionLog;
use crate::VersionRecord;
use crate::WatchCredentials;
use crate::EMPTY_PAYLOAD;

/// Current configuration of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub cur_index: u64,
    pub max_index: u64,
    pub op_num: u64,
    pub app_config: String,
    pub source_config: String,
}

/// Outcome of [`ConfigStore::get_current`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentConfig {
    /// Caller already holds `op_num`
    Unchanged { op_num: u64 },
    Snapshot(ConfigSnapshot),
}

/// Empty payloads become `{}`; anything else must parse as a JSON object.
pub fn normalize_payload(
    field: &str,
    payload: &str,
) -> Result<String> {
    if payload.is_empty() {
        return Ok(EMPTY_PAYLOAD.to_string());
    }
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(serde_json::Value::Object(_)) => Ok(payload.to_string()),
        _ => Err(Error::ConfigFormat(field.to_string())),
    }
}

/// Protocol layer over a [`VersionLog`].
///
/// Validates arguments, enforces the allocation order of `Set` and answers
/// `GetCurrent` with the cheap "unchanged" short-circuit. Errors are returned
/// as-is, never retried here.
#[derive(Clone)]
pub struct ConfigStore {
    log: Arc<dyn VersionLog>,
    allocation: AllocationMode,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("allocation", &self.allocation)
            .finish()
    }
}

impl ConfigStore {
    pub fn new(
        log: Arc<dyn VersionLog>,
        allocation: AllocationMode,
    ) -> Self {
        Self { log, allocation }
    }

    pub fn log(&self) -> Arc<dyn VersionLog> {
        self.log.clone()
    }

    pub fn allocation(&self) -> AllocationMode {
        self.allocation
    }

    #[instrument(skip(self))]
    pub async fn get_current(
        &self,
        group: &str,
        app: &str,
        caller_op_num: u64,
    ) -> Result<CurrentConfig> {
        let key = AppKey::parse(group, app)?;
        self.current(&key, caller_op_num).await
    }

    /// Same as [`Self::get_current`] for an already validated key.
    pub(crate) async fn current(
        &self,
        key: &AppKey,
        caller_op_num: u64,
    ) -> Result<CurrentConfig> {
        let pointer = self.log.pointer(key).await?.ok_or(Error::NotExist)?;

        if caller_op_num == pointer.op_num && pointer.op_num != 0 {
            return Ok(CurrentConfig::Unchanged {
                op_num: pointer.op_num,
            });
        }

        let version = if pointer.cur_index == 0 {
            VersionRecord::empty()
        } else {
            self.log.version(key, pointer.cur_index).await?.ok_or_else(|| {
                Error::from(StorageError::DataCorruption {
                    location: format!("{key} pointer references missing version {}", pointer.cur_index),
                })
            })?
        };

        Ok(CurrentConfig::Snapshot(ConfigSnapshot {
            cur_index: pointer.cur_index,
            max_index: pointer.max_index,
            op_num: pointer.op_num,
            app_config: version.app_config,
            source_config: version.source_config,
        }))
    }

    #[instrument(skip(self))]
    pub async fn get_by_index(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<VersionRecord> {
        let key = AppKey::parse(group, app)?;
        self.log.version(&key, index).await?.ok_or(Error::NotExist)
    }

    /// Appends a new version and makes it current.
    ///
    /// The version record is always written before `cur_index` can reference it.
    #[instrument(skip(self, app_config, source_config))]
    pub async fn set(
        &self,
        group: &str,
        app: &str,
        app_config: &str,
        source_config: &str,
    ) -> Result<PointerRecord> {
        let key = AppKey::parse(group, app)?;
        let app_config = normalize_payload("app_config", app_config)?;
        let source_config = normalize_payload("source_config", source_config)?;

        let pointer = match self.allocation {
            AllocationMode::Transactional => {
                self.log
                    .append_and_advance(&key, &app_config, &source_config)
                    .await?
            }
            AllocationMode::Ordered => {
                let index = self.log.reserve_index(&key).await?;
                self.log
                    .write_version(
                        &key,
                        &VersionRecord {
                            index,
                            app_config,
                            source_config,
                        },
                    )
                    .await?;
                self.log.advance_current(&key, index).await?
            }
        };

        CONFIG_MUTATIONS.with_label_values(&["set"]).inc();
        info!(app = %key, index = pointer.cur_index, op_num = pointer.op_num, "config set");
        Ok(pointer)
    }

    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<PointerRecord> {
        let key = AppKey::parse(group, app)?;
        let pointer = self.log.repoint(&key, index).await?;

        CONFIG_MUTATIONS.with_label_values(&["rollback"]).inc();
        info!(app = %key, index, op_num = pointer.op_num, "config rolled back");
        Ok(pointer)
    }

    pub async fn list_groups(&self) -> Result<Vec<String>> {
        self.log.groups().await
    }

    pub async fn list_apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>> {
        validate_name("group", group)?;
        self.log.apps(group).await
    }

    /// Stored watch credentials, all-empty when direct watching is unsupported
    pub async fn get_watch_addr(&self) -> Result<WatchCredentials> {
        Ok(self.log.watch_credentials().await?.unwrap_or_default())
    }

    /// Stores `credentials`, or clears the record when any field is empty.
    pub async fn set_watch_addr(
        &self,
        credentials: WatchCredentials,
    ) -> Result<()> {
        if credentials.is_complete() {
            debug!(?credentials, "storing watch credentials");
            self.log.set_watch_credentials(Some(credentials)).await
        } else {
            debug!("clearing watch credentials");
            self.log.set_watch_credentials(None).await
        }
    }
}

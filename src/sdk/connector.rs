use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::init_sled_db;
use crate::FeedError;
use crate::Result;
use crate::SledVersionLog;
use crate::StorageConfig;
use crate::VersionLog;
use crate::WatchCredentials;

/// Opens direct store access from the watch credentials handed out by the server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        credentials: &WatchCredentials,
    ) -> Result<Arc<dyn VersionLog>>;
}

/// Opens the sled database named by the first usable entry of `addrs`.
///
/// Each entry is a storage root directory (`storage.db_root_dir` of the
/// server). sled takes an exclusive lock, so this only succeeds when no other
/// process holds the database open.
#[derive(Debug, Clone, Default)]
pub struct SledConnector {
    template: StorageConfig,
}

impl SledConnector {
    /// `template` supplies cache and flush settings; its directory is ignored.
    pub fn new(template: StorageConfig) -> Self {
        Self { template }
    }
}

#[async_trait]
impl StoreConnector for SledConnector {
    async fn connect(
        &self,
        credentials: &WatchCredentials,
    ) -> Result<Arc<dyn VersionLog>> {
        if !credentials.username.is_empty() || !credentials.replica_set_name.is_empty() {
            debug!("embedded store ignores username and replica set name");
        }

        let mut last_error = None;
        for addr in credentials.addrs.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            let config = StorageConfig {
                db_root_dir: PathBuf::from(addr),
                ..self.template.clone()
            };
            match init_sled_db(&config).and_then(SledVersionLog::new) {
                Ok(log) => {
                    info!(addr, "connected to config store");
                    return Ok(Arc::new(log));
                }
                Err(e) => {
                    warn!(addr, "cannot open config store: {:?}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FeedError::Open {
                target: format!("{:?}", credentials.addrs),
                reason: "no usable address".into(),
            }
            .into()
        }))
    }
}

/// Hands out a store handle that is already open in this process.
#[derive(Clone)]
pub struct LocalConnector {
    log: Arc<dyn VersionLog>,
}

impl LocalConnector {
    pub fn new(log: Arc<dyn VersionLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl StoreConnector for LocalConnector {
    async fn connect(
        &self,
        _credentials: &WatchCredentials,
    ) -> Result<Arc<dyn VersionLog>> {
        Ok(self.log.clone())
    }
}

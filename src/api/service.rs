use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;

use super::ConfigApi;
use super::InfoResponse;
use crate::metrics::API_REQUEST_LATENCY;
use crate::ConfigStore;
use crate::CurrentConfig;
use crate::Error;
use crate::ErrorCode;
use crate::Result;
use crate::VersionRecord;
use crate::WatchCredentials;

/// In-process [`ConfigApi`] bounding every store call by a deadline
#[derive(Clone, Debug)]
pub struct ConfigService {
    store: ConfigStore,
    request_timeout: Duration,
}

impl ConfigService {
    pub fn new(
        store: ConfigStore,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            request_timeout,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub(super) async fn call<T, F>(
        &self,
        method: &'static str,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(self.request_timeout)),
        };
        API_REQUEST_LATENCY
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(e) = &result {
            match e.code() {
                ErrorCode::NotExist | ErrorCode::ConfigFormat | ErrorCode::BadRequest => {
                    debug!(method, "request rejected: {}", e)
                }
                _ => error!(method, "request failed: {:?}", e),
            }
        }
        result
    }
}

#[async_trait]
impl ConfigApi for ConfigService {
    async fn info(
        &self,
        group: &str,
        app: &str,
        op_num: u64,
    ) -> Result<InfoResponse> {
        let current = self.call("info", self.store.get_current(group, app, op_num)).await;
        match current {
            Ok(CurrentConfig::Unchanged { op_num }) => Ok(InfoResponse::Unchanged { op_num }),
            Ok(CurrentConfig::Snapshot(snapshot)) => Ok(InfoResponse::Current(snapshot)),
            Err(Error::NotExist) => Ok(InfoResponse::NotExist),
            Err(e) => Err(e),
        }
    }

    async fn set(
        &self,
        group: &str,
        app: &str,
        app_config: &str,
        source_config: &str,
    ) -> Result<()> {
        self.call(
            "set",
            self.store.set(group, app, app_config, source_config),
        )
        .await?;
        Ok(())
    }

    async fn rollback(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<()> {
        self.call("rollback", self.store.rollback(group, app, index))
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<VersionRecord> {
        self.call("get", self.store.get_by_index(group, app, index))
            .await
    }

    async fn groups(&self) -> Result<Vec<String>> {
        self.call("groups", self.store.list_groups()).await
    }

    async fn apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>> {
        self.call("apps", self.store.list_apps(group)).await
    }

    async fn get_watch_addr(&self) -> Result<WatchCredentials> {
        self.call("get_watch_addr", self.store.get_watch_addr())
            .await
    }

    async fn set_watch_addr(
        &self,
        credentials: WatchCredentials,
    ) -> Result<()> {
        self.call("set_watch_addr", self.store.set_watch_addr(credentials))
            .await
    }
}

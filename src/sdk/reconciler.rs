use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::SledConnector;
use super::StoreConnector;
use crate::async_task::pause;
use crate::async_task::retry_until_deadline;
use crate::async_task::Backoff;
use crate::file_io::write_atomically;
use crate::metrics::SDK_SYNC_ERRORS;
use crate::metrics::SDK_UPDATES;
use crate::normalize_payload;
use crate::AllocationMode;
use crate::AppKey;
use crate::BackoffPolicy;
use crate::ChangeFeedWatcher;
use crate::ChangeSubscriber;
use crate::ConfigApi;
use crate::ConfigNotification;
use crate::ConfigStore;
use crate::CurrentConfig;
use crate::DeliveryStrategy;
use crate::Error;
use crate::HttpConfigClient;
use crate::InfoResponse;
use crate::Result;
use crate::RetryPolicies;
use crate::SdkConfig;
use crate::EMPTY_PAYLOAD;
use crate::MIN_POLL_INTERVAL_MS;

pub const APP_CONFIG_FILE: &str = "AppConfig.json";
pub const SOURCE_CONFIG_FILE: &str = "SourceConfig.json";

/// How a running reconciler learns about changes, after fallbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    /// Tailing the store's change feed
    ChangeFeed,
    /// Polling the store directly
    StorePoll,
    /// Polling the server API
    ApiPoll,
}

impl SyncSource {
    fn label(self) -> &'static str {
        match self {
            SyncSource::ChangeFeed => "watch",
            SyncSource::StorePoll => "db_poll",
            SyncSource::ApiPoll => "api_poll",
        }
    }
}

/// The two configuration files of this process and the `op_num` they hold.
pub(crate) struct LocalConfig {
    dir: PathBuf,
    last_applied: tokio::sync::Mutex<u64>,
}

impl LocalConfig {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            last_applied: tokio::sync::Mutex::new(0),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) async fn last_applied(&self) -> u64 {
        *self.last_applied.lock().await
    }

    /// Writes `notification` to disk unless it is stale.
    ///
    /// An update is stale when its `op_num` is not above the last applied one;
    /// `Empty` is stale when nothing was applied yet. `force` skips both checks.
    /// Returns whether the files were rewritten.
    pub(crate) async fn apply(
        &self,
        notification: ConfigNotification,
        force: bool,
    ) -> Result<bool> {
        let mut last = self.last_applied.lock().await;

        let (op_num, app_config, source_config) = match notification {
            ConfigNotification::Update(update) => {
                if !force && update.op_num <= *last {
                    trace!(op_num = update.op_num, last = *last, "stale update ignored");
                    SDK_UPDATES.with_label_values(&["ignored"]).inc();
                    return Ok(false);
                }
                (
                    update.op_num,
                    normalize_payload("app_config", &update.app_config)?,
                    normalize_payload("source_config", &update.source_config)?,
                )
            }
            ConfigNotification::Empty => {
                if !force && *last == 0 {
                    trace!("empty notification ignored, nothing applied yet");
                    SDK_UPDATES.with_label_values(&["ignored"]).inc();
                    return Ok(false);
                }
                (0, EMPTY_PAYLOAD.to_string(), EMPTY_PAYLOAD.to_string())
            }
        };

        write_atomically(&self.dir.join(SOURCE_CONFIG_FILE), source_config.as_bytes()).await?;
        write_atomically(&self.dir.join(APP_CONFIG_FILE), app_config.as_bytes()).await?;

        info!(op_num, previous = *last, "configuration applied");
        *last = op_num;
        SDK_UPDATES.with_label_values(&["applied"]).inc();
        Ok(true)
    }
}

#[async_trait]
impl ChangeSubscriber for LocalConfig {
    async fn on_change(
        &self,
        notification: ConfigNotification,
    ) -> Result<()> {
        if let Err(e) = self.apply(notification, false).await {
            error!("applying change notification failed: {:?}", e);
            SDK_SYNC_ERRORS
                .with_label_values(&[SyncSource::ChangeFeed.label()])
                .inc();
            return Err(e);
        }
        Ok(())
    }
}

/// Where polls go
#[derive(Clone)]
enum Poller {
    Api(Arc<dyn ConfigApi>),
    Store(ConfigStore),
}

impl Poller {
    /// `None` when the caller is up to date.
    async fn fetch(
        &self,
        key: &AppKey,
        op_num: u64,
    ) -> Result<Option<ConfigNotification>> {
        match self {
            Poller::Api(api) => match api.info(&key.group, &key.app, op_num).await? {
                InfoResponse::NotExist => Ok(Some(ConfigNotification::Empty)),
                InfoResponse::Unchanged { .. } => Ok(None),
                InfoResponse::Current(snapshot) => Ok(Some(ConfigNotification::Update(snapshot.into()))),
            },
            Poller::Store(store) => match store.current(key, op_num).await {
                Ok(CurrentConfig::Unchanged { .. }) => Ok(None),
                Ok(CurrentConfig::Snapshot(snapshot)) => Ok(Some(ConfigNotification::Update(snapshot.into()))),
                Err(Error::NotExist) => Ok(Some(ConfigNotification::Empty)),
                Err(e) => Err(e),
            },
        }
    }
}

/// Assembles a [`ClientReconciler`].
///
/// Without an injected API the reconciler talks to `sdk.endpoints` over HTTP;
/// without an injected connector, direct store access goes through
/// [`SledConnector`].
pub struct ReconcilerBuilder {
    sdk: SdkConfig,
    retry: RetryPolicies,
    api: Option<Arc<dyn ConfigApi>>,
    connector: Option<Arc<dyn StoreConnector>>,
}

impl ReconcilerBuilder {
    pub fn new(sdk: SdkConfig) -> Self {
        Self {
            sdk,
            retry: RetryPolicies::default(),
            api: None,
            connector: None,
        }
    }

    pub fn retry_policies(
        mut self,
        retry: RetryPolicies,
    ) -> Self {
        self.retry = retry;
        self
    }

    /// Server API to use instead of the HTTP client. Required for `rpc_poll`.
    pub fn api(
        mut self,
        api: Arc<dyn ConfigApi>,
    ) -> Self {
        self.api = Some(api);
        self
    }

    pub fn connector(
        mut self,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Fetches and writes the first configuration, then starts syncing in the background.
    ///
    /// Fails with [`Error::Bootstrap`] when the first configuration cannot be
    /// fetched within `sdk.bootstrap_timeout_ms`.
    pub async fn start(self) -> Result<ClientReconciler> {
        let ReconcilerBuilder {
            sdk,
            retry,
            api,
            connector,
        } = self;

        let key = AppKey::parse(&sdk.group, &sdk.app)?;
        let api: Arc<dyn ConfigApi> = match api {
            Some(api) => api,
            None if sdk.strategy == DeliveryStrategy::RpcPoll => {
                return Err(Error::InvalidConfig(
                    "rpc_poll needs an injected ConfigApi".into(),
                ))
            }
            None => {
                sdk.validate()?;
                Arc::new(HttpConfigClient::new(
                    sdk.endpoints.clone(),
                    sdk.request_timeout(),
                )?)
            }
        };
        if sdk.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            warn!(
                "poll interval of {}ms is too short, using {}ms; use the watch strategy for faster updates",
                sdk.poll_interval_ms, MIN_POLL_INTERVAL_MS
            );
        }

        let deadline = Instant::now() + sdk.bootstrap_timeout();
        let remaining = || deadline.saturating_duration_since(Instant::now());

        let store = match sdk.strategy {
            DeliveryStrategy::Watch | DeliveryStrategy::DbPoll => {
                let connector = connector.unwrap_or_else(|| Arc::new(SledConnector::default()));
                open_store(&api, connector.as_ref(), &retry.bootstrap, remaining()).await?
            }
            DeliveryStrategy::RpcPoll | DeliveryStrategy::HttpPoll => None,
        };

        let (source, poller) = match (sdk.strategy, store) {
            (DeliveryStrategy::Watch, Some(store)) => (SyncSource::ChangeFeed, Poller::Store(store)),
            (DeliveryStrategy::DbPoll, Some(store)) => (SyncSource::StorePoll, Poller::Store(store)),
            _ => (SyncSource::ApiPoll, Poller::Api(api)),
        };
        info!(app = %key, strategy = %sdk.strategy, source = ?source, "starting client reconciler");

        let local = Arc::new(LocalConfig::new(sdk.config_dir.clone()));
        let first = retry_until_deadline(
            "bootstrap_fetch",
            || poller.fetch(&key, 0),
            &retry.bootstrap,
            remaining(),
        )
        .await
        .map_err(|e| Error::Bootstrap(format!("first fetch of {key} failed: {e}")))?;
        local
            .apply(first.unwrap_or(ConfigNotification::Empty), true)
            .await?;

        let cancel = CancellationToken::new();
        let task = match (source, poller) {
            (SyncSource::ChangeFeed, Poller::Store(store)) => tokio::spawn(follow_feed(
                store,
                key,
                retry.feed_reconnect,
                local.clone(),
                cancel.clone(),
            )),
            (source, poller) => tokio::spawn(poll_loop(
                source,
                poller,
                key,
                sdk.poll_interval(),
                retry.poll,
                local.clone(),
                cancel.clone(),
            )),
        };

        Ok(ClientReconciler {
            local,
            source,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Keeps `AppConfig.json` and `SourceConfig.json` in a directory in sync with
/// the server's current configuration of one application.
///
/// Files are only rewritten for strictly newer `op_num`s, so replays and
/// reordering never move them backwards.
pub struct ClientReconciler {
    local: Arc<LocalConfig>,
    source: SyncSource,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClientReconciler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientReconciler")
            .field("dir", &self.local.dir())
            .field("source", &self.source)
            .finish()
    }
}

impl ClientReconciler {
    pub fn builder(sdk: SdkConfig) -> ReconcilerBuilder {
        ReconcilerBuilder::new(sdk)
    }

    /// `op_num` of the configuration currently on disk, 0 for none
    pub async fn last_applied(&self) -> u64 {
        self.local.last_applied().await
    }

    pub fn source(&self) -> SyncSource {
        self.source
    }

    pub fn config_dir(&self) -> &Path {
        self.local.dir()
    }

    /// Stops background syncing and waits for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("reconciler task failed: {:?}", e);
            }
        }
    }
}

impl Drop for ClientReconciler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `None` when direct access is unsupported or unreachable.
async fn open_store(
    api: &Arc<dyn ConfigApi>,
    connector: &dyn StoreConnector,
    policy: &BackoffPolicy,
    deadline: Duration,
) -> Result<Option<ConfigStore>> {
    let credentials = retry_until_deadline("get_watch_addr", || api.get_watch_addr(), policy, deadline)
        .await
        .map_err(|e| Error::Bootstrap(format!("fetching watch address failed: {e}")))?;

    if credentials.addrs.is_empty() {
        warn!("config server does not support direct watching, falling back to polling");
        return Ok(None);
    }
    match connector.connect(&credentials).await {
        Ok(log) => Ok(Some(ConfigStore::new(log, AllocationMode::default()))),
        Err(e) => {
            warn!("connecting to config store failed: {:?}, falling back to polling", e);
            Ok(None)
        }
    }
}

async fn follow_feed(
    store: ConfigStore,
    key: AppKey,
    reconnect: BackoffPolicy,
    local: Arc<LocalConfig>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(&reconnect);
    loop {
        let watched = match ChangeFeedWatcher::new(store.clone(), &key.group, &key.app, reconnect) {
            Ok(watcher) => watcher.watch(local.clone(), cancel.clone()).await,
            Err(e) => Err(e),
        };
        match watched {
            Ok(()) => {
                debug!(app = %key, "feed follower cancelled");
                return;
            }
            Err(e) => {
                error!(app = %key, "change feed watcher stopped: {:?}", e);
                SDK_SYNC_ERRORS
                    .with_label_values(&[SyncSource::ChangeFeed.label()])
                    .inc();
                if !pause(&cancel, backoff.next_delay()).await {
                    return;
                }
            }
        }
    }
}

async fn poll_loop(
    source: SyncSource,
    poller: Poller,
    key: AppKey,
    interval: Duration,
    policy: BackoffPolicy,
    local: Arc<LocalConfig>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(&policy);
    let mut delay = interval;
    loop {
        if !pause(&cancel, delay).await {
            debug!(app = %key, "poller cancelled");
            return;
        }

        let op_num = local.last_applied().await;
        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            polled = timeout(interval, poller.fetch(&key, op_num)) => polled,
        };
        let result = match polled {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(interval)),
        };

        match result {
            Ok(fetched) => {
                backoff.reset();
                delay = interval;
                match fetched {
                    Some(notification) => {
                        if let Err(e) = local.apply(notification, false).await {
                            error!(app = %key, "applying polled configuration failed: {:?}", e);
                            SDK_SYNC_ERRORS.with_label_values(&[source.label()]).inc();
                        }
                    }
                    None => trace!(app = %key, op_num, "configuration unchanged"),
                }
            }
            Err(e) => {
                warn!(app = %key, "poll failed: {:?}", e);
                SDK_SYNC_ERRORS.with_label_values(&[source.label()]).inc();
                delay = backoff.next_delay().min(interval);
            }
        }
    }
}

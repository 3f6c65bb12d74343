use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::async_task::pause;
use crate::async_task::Backoff;
use crate::metrics::FEED_RECONNECTS;
use crate::AppKey;
use crate::BackoffPolicy;
use crate::ChangeFeed;
use crate::ConfigSnapshot;
use crate::ConfigStore;
use crate::CurrentConfig;
use crate::Error;
use crate::FeedError;
use crate::FeedEvent;
use crate::Result;
use crate::VersionRecord;

/// One configuration version as delivered to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub op_num: u64,
    pub cur_index: u64,
    pub app_config: String,
    pub source_config: String,
}

impl From<ConfigSnapshot> for ConfigUpdate {
    fn from(snapshot: ConfigSnapshot) -> Self {
        Self {
            op_num: snapshot.op_num,
            cur_index: snapshot.cur_index,
            app_config: snapshot.app_config,
            source_config: snapshot.source_config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigNotification {
    Update(ConfigUpdate),
    /// The application has no configuration (never set, or its pointer was removed)
    Empty,
}

impl ConfigNotification {
    pub fn op_num(&self) -> u64 {
        match self {
            ConfigNotification::Update(update) => update.op_num,
            ConfigNotification::Empty => 0,
        }
    }
}

/// Receives notifications from a [`ChangeFeedWatcher`].
///
/// Awaited inline by the tailing loop: the next event is not read before
/// `on_change` returns. An error leaves the notification undelivered; the
/// watcher reopens the feed and delivers a fresh baseline.
#[async_trait]
pub trait ChangeSubscriber: Send + Sync + 'static {
    async fn on_change(
        &self,
        notification: ConfigNotification,
    ) -> Result<()>;
}

/// Turns the raw change feed of one application into ordered, deduplicated
/// notifications.
///
/// ```text
/// Connecting -> Baselining -> Tailing
///      ^                         |
///      +------ feed error -------+
/// ```
///
/// Only cancellation ends the loop. The first `Connecting` failure is
/// returned from [`ChangeFeedWatcher::watch`] so the caller can pick another
/// strategy; later failures are retried forever with backoff.
pub struct ChangeFeedWatcher {
    store: ConfigStore,
    key: AppKey,
    reconnect: BackoffPolicy,
    last_delivered: u64,
}

impl ChangeFeedWatcher {
    pub fn new(
        store: ConfigStore,
        group: &str,
        app: &str,
        reconnect: BackoffPolicy,
    ) -> Result<Self> {
        Ok(Self {
            store,
            key: AppKey::parse(group, app)?,
            reconnect,
            last_delivered: 0,
        })
    }

    /// Opens the feed and tails it until `cancel` fires.
    pub async fn watch(
        mut self,
        subscriber: Arc<dyn ChangeSubscriber>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let log = self.store.log();
        let feed = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            feed = log.subscribe(&self.key) => feed?,
        };
        info!(app = %self.key, "change feed watcher started");

        self.run(feed, subscriber.as_ref(), &cancel).await;

        info!(app = %self.key, "change feed watcher stopped");
        Ok(())
    }

    async fn run(
        &mut self,
        feed: Box<dyn ChangeFeed>,
        subscriber: &dyn ChangeSubscriber,
        cancel: &CancellationToken,
    ) {
        let log = self.store.log();
        let mut backoff = Backoff::new(&self.reconnect);
        let mut opened = Some(feed);

        loop {
            // Connecting
            let mut feed = match opened.take() {
                Some(feed) => feed,
                None => {
                    FEED_RECONNECTS.with_label_values(&[self.key.to_string().as_str()]).inc();
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return,
                        feed = log.subscribe(&self.key) => feed,
                    };
                    match result {
                        Ok(feed) => feed,
                        Err(e) => {
                            warn!(app = %self.key, "reopening change feed failed: {:?}", e);
                            if !pause(cancel, backoff.next_delay()).await {
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            // Baselining
            let baseline = tokio::select! {
                _ = cancel.cancelled() => return,
                baseline = self.store.current(&self.key, 0) => baseline,
            };
            match self.deliver_baseline(baseline, subscriber).await {
                Ok(()) => backoff.reset(),
                Err(e) => {
                    warn!(app = %self.key, "baseline failed: {:?}", e);
                    if !pause(cancel, backoff.next_delay()).await {
                        return;
                    }
                    continue;
                }
            }

            // Tailing
            match self.tail(feed.as_mut(), subscriber, cancel).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(app = %self.key, "change feed interrupted: {:?}", e);
                    drop(feed);
                    if !pause(cancel, backoff.next_delay()).await {
                        return;
                    }
                }
            }
        }
    }

    async fn deliver_baseline(
        &mut self,
        baseline: Result<CurrentConfig>,
        subscriber: &dyn ChangeSubscriber,
    ) -> Result<()> {
        match baseline {
            Ok(CurrentConfig::Snapshot(snapshot)) => {
                debug!(app = %self.key, op_num = snapshot.op_num, "baseline");
                let op_num = snapshot.op_num;
                subscriber
                    .on_change(ConfigNotification::Update(snapshot.into()))
                    .await?;
                self.last_delivered = op_num;
            }
            Ok(CurrentConfig::Unchanged { op_num }) => {
                trace!(app = %self.key, op_num, "baseline unchanged");
            }
            Err(Error::NotExist) => {
                debug!(app = %self.key, "baseline: not configured");
                subscriber.on_change(ConfigNotification::Empty).await?;
                self.last_delivered = 0;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Returns `Ok(())` on cancellation and the feed error otherwise.
    async fn tail(
        &mut self,
        feed: &mut dyn ChangeFeed,
        subscriber: &dyn ChangeSubscriber,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = feed.next_event() => next,
            };
            match next {
                None => return Err(FeedError::Closed.into()),
                Some(Err(e)) => return Err(e),
                Some(Ok(event)) => self.handle_event(event, subscriber).await?,
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: FeedEvent,
        subscriber: &dyn ChangeSubscriber,
    ) -> Result<()> {
        match event {
            FeedEvent::Insert { full_document } => {
                self.deliver_if_newer(full_document.cur_index, full_document.op_num, subscriber)
                    .await
            }
            FeedEvent::Update { updated_fields } => match updated_fields.op_num {
                Some(op_num) => {
                    let cur_index = updated_fields.cur_index.ok_or_else(|| {
                        FeedError::MalformedEvent(format!(
                            "{}: op_num {op_num} changed without cur_index",
                            self.key
                        ))
                    })?;
                    self.deliver_if_newer(cur_index, op_num, subscriber).await
                }
                None => {
                    trace!(app = %self.key, ?updated_fields, "pointer update without op_num, skipped");
                    Ok(())
                }
            },
            FeedEvent::Delete => {
                info!(app = %self.key, "pointer removed");
                subscriber.on_change(ConfigNotification::Empty).await?;
                self.last_delivered = 0;
                Ok(())
            }
        }
    }

    async fn deliver_if_newer(
        &mut self,
        cur_index: u64,
        op_num: u64,
        subscriber: &dyn ChangeSubscriber,
    ) -> Result<()> {
        if op_num <= self.last_delivered {
            trace!(app = %self.key, op_num, last = self.last_delivered, "stale event skipped");
            return Ok(());
        }

        let update = if cur_index == 0 {
            let empty = VersionRecord::empty();
            ConfigUpdate {
                op_num,
                cur_index,
                app_config: empty.app_config,
                source_config: empty.source_config,
            }
        } else {
            let version = self
                .store
                .log()
                .version(&self.key, cur_index)
                .await?
                .ok_or(FeedError::DanglingPointer { index: cur_index })?;
            ConfigUpdate {
                op_num,
                cur_index,
                app_config: version.app_config,
                source_config: version.source_config,
            }
        };

        debug!(app = %self.key, op_num, cur_index, "delivering update");
        subscriber.on_change(ConfigNotification::Update(update)).await?;
        self.last_delivered = op_num;
        Ok(())
    }
}

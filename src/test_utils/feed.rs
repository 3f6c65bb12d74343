use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::AppKey;
use crate::ChangeFeed;
use crate::FeedError;
use crate::FeedEvent;
use crate::PointerRecord;
use crate::Result;
use crate::SledVersionLog;
use crate::VersionLog;
use crate::VersionRecord;
use crate::WatchCredentials;

pub(crate) type FeedSender = mpsc::UnboundedSender<Result<FeedEvent>>;

/// Change feed driven by a test through a channel. Dropping the sender ends the feed.
pub(crate) struct ChannelFeed {
    rx: mpsc::UnboundedReceiver<Result<FeedEvent>>,
}

pub(crate) fn channel_feed() -> (FeedSender, ChannelFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelFeed { rx })
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    async fn next_event(&mut self) -> Option<Result<FeedEvent>> {
        self.rx.recv().await
    }
}

/// Planned outcome of one `subscribe` call
pub(crate) enum Subscription {
    Feed(ChannelFeed),
    Fail,
}

/// Sled backed log whose `subscribe` hands out scripted feeds.
///
/// Every other call goes to the real log, so baselines and version fetches
/// see what the test wrote. Once the script runs out, `subscribe` fails.
pub(crate) struct ScriptedFeedLog {
    inner: Arc<SledVersionLog>,
    script: Mutex<VecDeque<Subscription>>,
    subscribe_calls: Mutex<usize>,
}

impl ScriptedFeedLog {
    pub(crate) fn new(
        inner: Arc<SledVersionLog>,
        script: Vec<Subscription>,
    ) -> Self {
        Self {
            inner,
            script: Mutex::new(script.into()),
            subscribe_calls: Mutex::new(0),
        }
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        *self.subscribe_calls.lock()
    }
}

#[async_trait]
impl VersionLog for ScriptedFeedLog {
    async fn pointer(
        &self,
        key: &AppKey,
    ) -> Result<Option<PointerRecord>> {
        self.inner.pointer(key).await
    }

    async fn version(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<Option<VersionRecord>> {
        self.inner.version(key, index).await
    }

    async fn reserve_index(
        &self,
        key: &AppKey,
    ) -> Result<u64> {
        self.inner.reserve_index(key).await
    }

    async fn write_version(
        &self,
        key: &AppKey,
        record: &VersionRecord,
    ) -> Result<()> {
        self.inner.write_version(key, record).await
    }

    async fn advance_current(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<PointerRecord> {
        self.inner.advance_current(key, index).await
    }

    async fn append_and_advance(
        &self,
        key: &AppKey,
        app_config: &str,
        source_config: &str,
    ) -> Result<PointerRecord> {
        self.inner.append_and_advance(key, app_config, source_config).await
    }

    async fn repoint(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<PointerRecord> {
        self.inner.repoint(key, index).await
    }

    async fn groups(&self) -> Result<Vec<String>> {
        self.inner.groups().await
    }

    async fn apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>> {
        self.inner.apps(group).await
    }

    async fn watch_credentials(&self) -> Result<Option<WatchCredentials>> {
        self.inner.watch_credentials().await
    }

    async fn set_watch_credentials(
        &self,
        credentials: Option<WatchCredentials>,
    ) -> Result<()> {
        self.inner.set_watch_credentials(credentials).await
    }

    async fn subscribe(
        &self,
        key: &AppKey,
    ) -> Result<Box<dyn ChangeFeed>> {
        *self.subscribe_calls.lock() += 1;
        let next = self.script.lock().pop_front();
        match next {
            Some(Subscription::Feed(feed)) => Ok(Box::new(feed)),
            Some(Subscription::Fail) | None => Err(FeedError::Open {
                target: key.to_string(),
                reason: "scripted failure".into(),
            }
            .into()),
        }
    }
}

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::AppKey;
use super::PointerRecord;
use super::VersionRecord;
use super::WatchCredentials;
use crate::Result;

/// Fields of the pointer record that changed in an update event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerFields {
    pub cur_index: Option<u64>,
    pub max_index: Option<u64>,
    pub op_num: Option<u64>,
}

/// Raw change of the pointer record as reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Pointer created, full record attached
    Insert { full_document: PointerRecord },
    /// Pointer modified, only the changed fields attached
    Update { updated_fields: PointerFields },
    /// Pointer removed
    Delete,
}

/// Open subscription to the pointer record of one application.
///
/// `None` means the feed ended on the store side; errors are feed-level
/// faults. Either way the subscription must be reopened.
#[async_trait]
pub trait ChangeFeed: Send {
    async fn next_event(&mut self) -> Option<Result<FeedEvent>>;
}

/// Per-application append-only version log plus its pointer record.
///
/// Implementations own persistence only. Argument validation and payload
/// checks live in `ConfigStore`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionLog: Send + Sync + 'static {
    async fn pointer(
        &self,
        key: &AppKey,
    ) -> Result<Option<PointerRecord>>;

    async fn version(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<Option<VersionRecord>>;

    /// Atomically bumps `max_index` (creating the pointer if missing) and
    /// returns the reserved index. `cur_index` and `op_num` are untouched.
    async fn reserve_index(
        &self,
        key: &AppKey,
    ) -> Result<u64>;

    async fn write_version(
        &self,
        key: &AppKey,
        record: &VersionRecord,
    ) -> Result<()>;

    /// Moves `cur_index` forward to `index` (never backwards) and bumps `op_num`.
    async fn advance_current(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<PointerRecord>;

    /// Reserve, write and advance as one transaction.
    async fn append_and_advance(
        &self,
        key: &AppKey,
        app_config: &str,
        source_config: &str,
    ) -> Result<PointerRecord>;

    /// Points `cur_index` at an existing version and bumps `op_num`.
    ///
    /// Fails with `Error::NotExist` unless `1 <= index <= max_index`.
    async fn repoint(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<PointerRecord>;

    async fn groups(&self) -> Result<Vec<String>>;

    async fn apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>>;

    async fn watch_credentials(&self) -> Result<Option<WatchCredentials>>;

    /// `None` clears the record.
    async fn set_watch_credentials(
        &self,
        credentials: Option<WatchCredentials>,
    ) -> Result<()>;

    /// Opens a change feed scoped to the pointer record of `key`.
    async fn subscribe(
        &self,
        key: &AppKey,
    ) -> Result<Box<dyn ChangeFeed>>;
}

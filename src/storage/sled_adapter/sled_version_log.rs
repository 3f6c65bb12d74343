use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionError;
use sled::Tree;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::SledChangeFeed;
use crate::convert::safe_kv;
use crate::storage::decode;
use crate::storage::encode;
use crate::AppKey;
use crate::ChangeFeed;
use crate::Error;
use crate::PointerRecord;
use crate::Result;
use crate::StorageError;
use crate::VersionLog;
use crate::VersionRecord;
use crate::WatchCredentials;

/// Key of the pointer record inside an application tree
pub const POINTER_KEY: [u8; 8] = safe_kv(0);

const APP_TREE_PREFIX: &str = "s_";
const META_TREE_NAME: &str = "__d_config_meta";
const WATCH_CREDENTIALS_KEY: &[u8] = b"watch_credentials";

/// Sled backed version log.
///
/// One tree per application named `s_{group}/{app}`. The pointer record sits
/// at index 0 and version records at their own index, all keys big-endian so
/// iteration follows version order.
pub struct SledVersionLog {
    db: sled::Db,
    meta: Tree,
    trees: DashMap<AppKey, Tree>,
}

impl std::fmt::Debug for SledVersionLog {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledVersionLog")
            .field("cached_trees", &self.trees.len())
            .finish()
    }
}

impl SledVersionLog {
    pub fn new(db: sled::Db) -> Result<Self> {
        let meta = db.open_tree(META_TREE_NAME)?;
        Ok(Self {
            db,
            meta,
            trees: DashMap::new(),
        })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub async fn flush_async(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn tree_name(key: &AppKey) -> String {
        format!("{APP_TREE_PREFIX}{}/{}", key.group, key.app)
    }

    /// Returns the tree of `key`, creating it when missing.
    fn tree(
        &self,
        key: &AppKey,
    ) -> Result<Tree> {
        if let Some(tree) = self.trees.get(key) {
            return Ok(tree.clone());
        }
        let tree = self.db.open_tree(Self::tree_name(key))?;
        self.trees.insert(key.clone(), tree.clone());
        Ok(tree)
    }

    /// Returns the tree of `key` only if it already exists. Reads go through
    /// here so that looking up unknown apps leaves no empty trees behind.
    fn existing_tree(
        &self,
        key: &AppKey,
    ) -> Result<Option<Tree>> {
        if let Some(tree) = self.trees.get(key) {
            return Ok(Some(tree.clone()));
        }
        let name = Self::tree_name(key);
        let exists = self.db.tree_names().iter().any(|n| &n[..] == name.as_bytes());
        if !exists {
            return Ok(None);
        }
        let tree = self.db.open_tree(name)?;
        self.trees.insert(key.clone(), tree.clone());
        Ok(Some(tree))
    }

    /// Names of application trees holding a pointer record, as (group, app).
    fn configured_apps(&self) -> Result<Vec<(String, String)>> {
        let mut apps = Vec::new();
        for raw in self.db.tree_names() {
            let Ok(name) = std::str::from_utf8(&raw) else {
                continue;
            };
            let Some((group, app)) = name
                .strip_prefix(APP_TREE_PREFIX)
                .and_then(|rest| rest.split_once('/'))
            else {
                continue;
            };
            if !self.db.open_tree(name)?.contains_key(POINTER_KEY)? {
                continue;
            }
            apps.push((group.to_string(), app.to_string()));
        }
        Ok(apps)
    }
}

fn read_pointer(tree: &Tree) -> Result<Option<PointerRecord>> {
    tree.get(POINTER_KEY)?.map(|bytes| decode::<PointerRecord>(&bytes)).transpose()
}

/// Compare-and-swap loop over the pointer record.
///
/// `f` sees the current record (`None` if missing) and returns the next one,
/// or an error that aborts the update.
fn update_pointer<F>(
    tree: &Tree,
    mut f: F,
) -> Result<PointerRecord>
where
    F: FnMut(Option<PointerRecord>) -> Result<PointerRecord>,
{
    loop {
        let current = tree.get(POINTER_KEY)?;
        let decoded = current
            .as_deref()
            .map(decode::<PointerRecord>)
            .transpose()?;
        let next = f(decoded)?;
        let encoded = encode(&next)?;

        match tree.compare_and_swap(POINTER_KEY, current, Some(encoded))? {
            Ok(()) => return Ok(next),
            Err(_) => trace!("pointer changed concurrently, retrying"),
        }
    }
}

#[async_trait]
impl VersionLog for SledVersionLog {
    #[instrument(skip(self, key), fields(app = %key))]
    async fn pointer(
        &self,
        key: &AppKey,
    ) -> Result<Option<PointerRecord>> {
        match self.existing_tree(key)? {
            Some(tree) => read_pointer(&tree),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, key), fields(app = %key))]
    async fn version(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<Option<VersionRecord>> {
        if index == 0 {
            return Ok(None);
        }
        let Some(tree) = self.existing_tree(key)? else {
            return Ok(None);
        };
        tree.get(safe_kv(index))?
            .map(|bytes| decode::<VersionRecord>(&bytes))
            .transpose()
    }

    #[instrument(skip(self, key), fields(app = %key))]
    async fn reserve_index(
        &self,
        key: &AppKey,
    ) -> Result<u64> {
        let tree = self.tree(key)?;
        let pointer = update_pointer(&tree, |current| {
            let mut pointer = current.unwrap_or_default();
            pointer.max_index += 1;
            Ok(pointer)
        })?;
        debug!(index = pointer.max_index, "reserved version index");
        Ok(pointer.max_index)
    }

    #[instrument(skip(self, key, record), fields(app = %key, index = record.index))]
    async fn write_version(
        &self,
        key: &AppKey,
        record: &VersionRecord,
    ) -> Result<()> {
        let tree = self.tree(key)?;
        let encoded = encode(record)?;
        // Versions are immutable: the slot must still be free.
        match tree.compare_and_swap(safe_kv(record.index), None as Option<&[u8]>, Some(encoded))? {
            Ok(()) => Ok(()),
            Err(_) => Err(StorageError::DataCorruption {
                location: format!("{key} version {} already written", record.index),
            }
            .into()),
        }
    }

    #[instrument(skip(self, key), fields(app = %key))]
    async fn advance_current(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<PointerRecord> {
        let tree = self.tree(key)?;
        update_pointer(&tree, |current| {
            let mut pointer = current.ok_or(Error::NotExist)?;
            if index > pointer.max_index {
                return Err(StorageError::DataCorruption {
                    location: format!("{key} advance to unreserved index {index}"),
                }
                .into());
            }
            // A concurrent Set may already have moved past us.
            if index > pointer.cur_index {
                pointer.cur_index = index;
            }
            pointer.op_num += 1;
            Ok(pointer)
        })
    }

    #[instrument(skip(self, key, app_config, source_config), fields(app = %key))]
    async fn append_and_advance(
        &self,
        key: &AppKey,
        app_config: &str,
        source_config: &str,
    ) -> Result<PointerRecord> {
        let tree = self.tree(key)?;
        let result = tree.transaction(|tx| {
            let mut pointer = match tx.get(&POINTER_KEY[..])? {
                Some(bytes) => decode::<PointerRecord>(&bytes)
                    .map_err(ConflictableTransactionError::Abort)?,
                None => PointerRecord::default(),
            };
            let index = pointer.max_index + 1;
            let record = VersionRecord {
                index,
                app_config: app_config.to_string(),
                source_config: source_config.to_string(),
            };
            let encoded = encode(&record).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&safe_kv(index)[..], encoded)?;

            pointer.max_index = index;
            pointer.cur_index = index;
            pointer.op_num += 1;
            let encoded = encode(&pointer).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&POINTER_KEY[..], encoded)?;
            Ok(pointer)
        });

        match result {
            Ok(pointer) => Ok(pointer),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => {
                warn!("set transaction failed: {:?}", e);
                Err(StorageError::Transaction(e.to_string()).into())
            }
        }
    }

    #[instrument(skip(self, key), fields(app = %key))]
    async fn repoint(
        &self,
        key: &AppKey,
        index: u64,
    ) -> Result<PointerRecord> {
        let Some(tree) = self.existing_tree(key)? else {
            return Err(Error::NotExist);
        };
        update_pointer(&tree, |current| {
            let mut pointer = current.ok_or(Error::NotExist)?;
            if index == 0 || index > pointer.max_index {
                return Err(Error::NotExist);
            }
            // reserved by an ordered set that never wrote its version
            if !tree.contains_key(safe_kv(index))? {
                return Err(Error::NotExist);
            }
            pointer.cur_index = index;
            pointer.op_num += 1;
            Ok(pointer)
        })
    }

    async fn groups(&self) -> Result<Vec<String>> {
        let groups: BTreeSet<String> = self
            .configured_apps()?
            .into_iter()
            .map(|(group, _)| group)
            .collect();
        Ok(groups.into_iter().collect())
    }

    async fn apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>> {
        let mut apps: Vec<String> = self
            .configured_apps()?
            .into_iter()
            .filter(|(g, _)| g == group)
            .map(|(_, app)| app)
            .collect();
        apps.sort();
        Ok(apps)
    }

    async fn watch_credentials(&self) -> Result<Option<WatchCredentials>> {
        self.meta
            .get(WATCH_CREDENTIALS_KEY)?
            .map(|bytes| decode::<WatchCredentials>(&bytes))
            .transpose()
    }

    async fn set_watch_credentials(
        &self,
        credentials: Option<WatchCredentials>,
    ) -> Result<()> {
        match credentials {
            Some(credentials) => {
                self.meta.insert(WATCH_CREDENTIALS_KEY, encode(&credentials)?)?;
            }
            None => {
                self.meta.remove(WATCH_CREDENTIALS_KEY)?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, key), fields(app = %key))]
    async fn subscribe(
        &self,
        key: &AppKey,
    ) -> Result<Box<dyn ChangeFeed>> {
        let tree = self.tree(key)?;
        let subscriber = tree.watch_prefix(POINTER_KEY);
        // Read after subscribing so no write falls between the two.
        let last_seen = read_pointer(&tree)?;
        debug!(?last_seen, "change feed opened");
        Ok(Box::new(SledChangeFeed::new(key.clone(), subscriber, last_seen)))
    }
}

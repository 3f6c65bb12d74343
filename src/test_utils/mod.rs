//! Shared fixtures for unit tests
mod feed;

use std::sync::Arc;

pub(crate) use feed::*;
use tempfile::TempDir;

use crate::init_sled_db;
use crate::AllocationMode;
use crate::ConfigStore;
use crate::SledVersionLog;
use crate::StorageConfig;

pub(crate) fn setup_sled_log() -> (Arc<SledVersionLog>, TempDir) {
    let tempdir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        db_root_dir: tempdir.path().to_path_buf(),
        ..Default::default()
    };
    let db = init_sled_db(&config).unwrap();
    (Arc::new(SledVersionLog::new(db).unwrap()), tempdir)
}

pub(crate) fn setup_store(allocation: AllocationMode) -> (ConfigStore, Arc<SledVersionLog>, TempDir) {
    let (log, dir) = setup_sled_log();
    (ConfigStore::new(log.clone(), allocation), log, dir)
}

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// How `Set` allocates a new version index
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Reserve, write and advance inside one storage transaction
    #[default]
    Transactional,

    /// No cross-record transaction: reserve index, write version, then advance the pointer.
    /// Readers stay safe because `cur_index` is the last field written.
    Ordered,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the sled database
    #[serde(default = "default_db_root_dir")]
    pub db_root_dir: PathBuf,

    #[serde(default)]
    pub allocation: AllocationMode,

    /// Sled page cache size in bytes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Background flush interval of sled; `None` disables it
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_root_dir: default_db_root_dir(),
            allocation: AllocationMode::default(),
            cache_capacity: default_cache_capacity(),
            flush_every_ms: default_flush_every_ms(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.db_root_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "storage.db_root_dir cannot be empty".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::InvalidConfig(
                "storage.cache_capacity must be greater than 0".into(),
            ));
        }
        if self.flush_every_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "storage.flush_every_ms must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

fn default_db_root_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024 //64MB
}
fn default_flush_every_ms() -> Option<u64> {
    Some(10)
}

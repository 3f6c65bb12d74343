mod records;
mod sled_adapter;
mod version_log;

#[doc(hidden)]
pub use records::*;
#[doc(hidden)]
pub use sled_adapter::*;
#[doc(hidden)]
pub use version_log::*;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::StorageConfig;

/// Opens the sled database backing the version log
pub fn init_sled_db(config: &StorageConfig) -> Result<sled::Db> {
    debug!("init_sled_db from path: {:?}", &config.db_root_dir);

    let db_path = config.db_root_dir.join("version_log");

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(config.cache_capacity)
        .flush_every_ms(config.flush_every_ms)
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                db_path, e
            );
            e.into()
        })
}

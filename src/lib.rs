//! Versioned configuration distribution.
//!
//! Every `(group, app)` owns an append-only log of configuration versions and a
//! pointer naming the current one. The server side ([`ConfigStore`],
//! [`ConfigService`], [`config_routes`]) mutates and serves that log; the client
//! side ([`ClientReconciler`]) keeps a process's `AppConfig.json` and
//! `SourceConfig.json` in sync with it, by tailing the store's change feed
//! ([`ChangeFeedWatcher`]) or by polling.
mod api;
mod config;
mod errors;
mod metrics;
mod sdk;
mod storage;
mod store;
pub mod utils;
mod watch;

pub use api::*;
pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use sdk::*;
pub use storage::*;
pub use store::*;
pub use utils::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

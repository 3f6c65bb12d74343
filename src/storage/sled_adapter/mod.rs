mod sled_change_feed;
mod sled_version_log;

pub use sled_change_feed::*;
pub use sled_version_log::*;

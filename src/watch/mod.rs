mod change_feed_watcher;

pub use change_feed_watcher::*;

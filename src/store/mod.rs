mod config_store;

pub use config_store::*;

#[cfg(test)]
mod config_store_test;

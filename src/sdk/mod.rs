//! Client SDK: keeps a process's configuration files in sync with the service.
mod connector;
mod reconciler;
mod slot;

pub use connector::*;
pub use reconciler::*;
pub use slot::*;

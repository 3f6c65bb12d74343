pub(crate) mod async_task;
pub mod convert;
pub mod file_io;

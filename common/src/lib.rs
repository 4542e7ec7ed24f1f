pub mod file_format;
pub mod log_setup;
pub mod test_utils;
pub mod worker_pool;

pub use file_format::{FileExtensionError, FileFormatError, SerdeFormat, deserialize, serialize};
pub use worker_pool::{PoolError, ShutdownMode, WorkerPool};

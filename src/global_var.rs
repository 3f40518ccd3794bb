use crate::utilities::AsyncLogger;
use std::sync::{LazyLock, OnceLock};
use tokio::task::JoinHandle;

/// Installed once by the process that sets up logging; callers obtain a handle
/// through [`LOGGER`] rather than reaching into the cell directly.
pub static LOGGER_CELL: OnceLock<AsyncLogger> = OnceLock::new();
pub(crate) static LOGGER: crate::utilities::logger::Logger = crate::utilities::logger::Logger;

/// Background join handle for the logger's writer task, kept so shutdown can
/// await it after sending the shutdown sentinel.
pub static LOGGER_HANDLE: OnceLock<JoinHandle<()>> = OnceLock::new();

pub static DEBUG_MODE: LazyLock<bool> = LazyLock::new(|| {
    let env_var = std::env::var("DEBUG_MODE").unwrap_or_default();
    env_var == "1" || env_var == "true"
});

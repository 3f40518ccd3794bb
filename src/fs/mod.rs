pub mod fs_op;
pub mod util;

use crate::err::{CacheError, Result};
use crate::utilities::AsyncLogger;
use crate::utilities::init_file_logger;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// Bootstrap the working directory the local tier lives under:
///
/// 1. Verify read/write/execute permissions on `path`.
/// 2. Get or create a `.cache` metadata directory.
/// 3. Get or create `.cache/logs` and `.cache/tmp` subdirectories.
/// 4. Initialize the async file logger writing into `.cache/logs`.
///
/// Returns the logger handle and its background writer task.
pub async fn init_working_dir<P: AsRef<Path>>(path: P) -> Result<(AsyncLogger, JoinHandle<()>)> {
    let base: &Path = path.as_ref();

    let perms = util::check_dir_permissions(base);
    if !(perms.read && perms.write && perms.execute) {
        return Err(CacheError::illegal_state(format!(
            "insufficient permissions for path '{}': read={}, write={}, execute={}",
            base.display(),
            perms.read,
            perms.write,
            perms.execute
        )));
    }

    let meta_dir: PathBuf = base.join(".cache");
    fs::create_dir_all(&meta_dir)?;

    let logs_dir: PathBuf = meta_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let tmp_dir: PathBuf = meta_dir.join("tmp");
    fs::create_dir_all(&tmp_dir)?;

    let log_file: PathBuf = logs_dir.join("cache.log");
    let (logger, task) = init_file_logger(&log_file).await?;

    Ok((logger, task))
}

/// Directory used for atomic-write staging under a given working directory.
pub fn tmp_dir_under(base: &Path) -> PathBuf {
    base.join(".cache").join("tmp")
}

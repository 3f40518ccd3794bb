use crate::err::Result;
use crate::global_var::LOGGER;
use rand::random;
use std::path::{Path, PathBuf};

/// Write `data` to a temp file under `tmp_dir` then rename it into `dest`,
/// so readers never observe a partially-written file at `dest`.
pub async fn fs_save_bytes_atomic(tmp_dir: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(tmp_dir).await?;
    let tmp = tmp_dir.join(format!("write.tmp-{}", random::<u64>()));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, dest).await?;

    LOGGER.trace(format!("fs_save_bytes_atomic: saved to {}", dest.display()));

    Ok(())
}

/// Ensure `dest` exists as an empty file, creating its parent directories
/// first. A no-op if the file is already present.
pub async fn ensure_file_exists(dest: &Path) -> Result<()> {
    if tokio::fs::try_exists(dest).await? {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(dest)
        .await?;
    Ok(())
}

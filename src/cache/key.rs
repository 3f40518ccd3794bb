//! Resource key derivation (C1).
//!
//! Maps a logical resource to its lock key: the canonical path of the
//! shared-store *parent directory* of the resource's file, or of the
//! resource itself if it denotes a directory. Parent-level keying is
//! deliberate — a file and its checksum/signature siblings (`foo.jar`,
//! `foo.jar.sha1`) must share one lock so a write to one cannot race a
//! delete of the other.

use crate::cache::collaborators::{PathGenerator, Resource};
use crate::err::{CacheError, Result};
use std::path::{Path, PathBuf};

/// Resolve `resource`'s lock key. Deterministic: the same resource always
/// yields the same string within a process.
pub fn key_for(generator: &dyn PathGenerator, resource: &Resource) -> Result<String> {
    let path = generator.path_for(resource);
    let lock_dir = lock_directory(&path);
    canonical_key(&lock_dir)
}

/// The directory this lock key is rooted at: `path` itself if it is (or
/// will be) a directory, otherwise its parent.
fn lock_directory(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf())
    }
}

/// Canonicalize `dir`, creating it first if absent so a brand-new artifact's
/// parent directory still yields a stable key. Fails with `Io` if the
/// directory cannot be created or canonicalized for any other reason.
fn canonical_key(dir: &Path) -> Result<String> {
    std::fs::create_dir_all(dir)?;
    let canon = std::fs::canonicalize(dir)
        .map_err(|e| CacheError::Io(e))?;
    Ok(canon.to_string_lossy().into_owned())
}

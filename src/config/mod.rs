//! Configuration surface for the cache engine.
//!
//! A single required value drives everything: the shared-store mount root.
//! It is resolved first from an explicit constructor argument and, if blank,
//! from the process-wide property `galley.nfs.basedir` (exposed to this
//! process as the `GALLEY_NFS_BASEDIR` environment variable, since Rust has no
//! direct equivalent of a JVM system property). Blank in both places is a
//! construction-time `IllegalArgument`.

use crate::err::{CacheError, Result};
use std::path::{Path, PathBuf};

const SHARED_ROOT_PROPERTY: &str = "GALLEY_NFS_BASEDIR";

/// Resolved configuration for a [`crate::cache::CacheProvider`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    shared_root: PathBuf,
    /// Default timeout, in seconds, for `try_lock_and` and other
    /// timed acquisitions across the system. 600s per the design.
    pub default_timeout_secs: u64,
}

impl CacheConfig {
    /// Build a config from an explicit root, falling back to the
    /// `GALLEY_NFS_BASEDIR` property when `shared_root` is `None` or blank.
    pub fn new(shared_root: Option<&str>) -> Result<Self> {
        let resolved = match shared_root.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => std::env::var(SHARED_ROOT_PROPERTY).unwrap_or_default(),
        };

        if resolved.trim().is_empty() {
            return Err(CacheError::illegal_argument(
                "shared-store mount root is blank: pass it explicitly or set GALLEY_NFS_BASEDIR",
            ));
        }

        Ok(Self {
            shared_root: PathBuf::from(resolved),
            default_timeout_secs: 600,
        })
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }
}

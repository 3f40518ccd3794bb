//! External collaborator contracts.
//!
//! The concurrency/locking/stream-duplexing engine in this module is built
//! against a handful of collaborators it does not implement itself: the
//! single-tier local cache provider, the cluster-visible ownership map, and
//! the path generator that maps a logical [`Resource`] to a shared-store
//! filesystem path. Production deployments plug in real implementations
//! (a journaled local disk cache, an Infinispan-style distributed map); the
//! in-memory ones here exist so the engine is exercisable and testable on
//! its own.

use crate::err::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque logical identity of a cached artifact. The engine never parses
/// `path`; it is handed to a [`PathGenerator`] to resolve a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub location: String,
    pub path: PathBuf,
    /// Per-resource override of the shared root for this resource's read
    /// path, per the `alt_storage_location` configuration attribute.
    pub alt_storage_location: Option<PathBuf>,
}

impl Resource {
    pub fn new(location: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            path: path.into(),
            alt_storage_location: None,
        }
    }

    pub fn with_alt_storage_location(mut self, alt: impl Into<PathBuf>) -> Self {
        self.alt_storage_location = Some(alt.into());
        self
    }

    /// Identity used to key the per-resource mutex registry (C2) and the
    /// per-resource lock key (C1): same location+path always maps to the
    /// same transfer object within a process.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.location, self.path.display())
    }
}

/// Resolves a [`Resource`] to an absolute shared-store filesystem path.
/// Deliberately out of scope for the engine's own logic; a thin default
/// implementation is provided for tests and simple deployments.
pub trait PathGenerator: Send + Sync {
    fn path_for(&self, resource: &Resource) -> PathBuf;
}

/// Joins the shared root with the resource's relative path, honoring a
/// per-resource `alt_storage_location` override.
pub struct DefaultPathGenerator {
    shared_root: PathBuf,
}

impl DefaultPathGenerator {
    pub fn new(shared_root: impl Into<PathBuf>) -> Self {
        Self {
            shared_root: shared_root.into(),
        }
    }
}

impl PathGenerator for DefaultPathGenerator {
    fn path_for(&self, resource: &Resource) -> PathBuf {
        match &resource.alt_storage_location {
            Some(alt) => alt.join(&resource.path),
            None => self.shared_root.join(&resource.path),
        }
    }
}

/// The single-tier local cache provider: fast local disk storage with its
/// own journaling that already serializes concurrent readers against an
/// in-progress local writer.
#[async_trait]
pub trait LocalCacheProvider: Send + Sync {
    async fn open_input(
        &self,
        resource: &Resource,
    ) -> Result<Option<Box<dyn AsyncRead + Send + Unpin>>>;
    async fn open_output(&self, resource: &Resource) -> Result<Box<dyn AsyncWrite + Send + Unpin>>;
    async fn exists(&self, resource: &Resource) -> Result<bool>;
    async fn delete(&self, resource: &Resource) -> Result<bool>;
    async fn copy(&self, from: &Resource, to: &Resource) -> Result<()>;
    async fn is_read_locked(&self, resource: &Resource) -> Result<bool>;
    async fn is_write_locked(&self, resource: &Resource) -> Result<bool>;
    async fn wait_for_read_unlock(&self, resource: &Resource) -> Result<()>;
    async fn wait_for_write_unlock(&self, resource: &Resource) -> Result<()>;
    /// The local filesystem path backing `resource`, without opening it.
    fn detached_file(&self, resource: &Resource) -> PathBuf;
    /// Drop any per-current-context resources the local provider is holding
    /// (mirrors C10's delegation on `cleanup_current_thread`).
    fn cleanup_current_context(&self) {}
}

/// Lock levels recognized by the file-lock facade (C3) and threaded through
/// to the cluster lock coordinator (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockLevel {
    Read,
    Write,
    Delete,
}

/// Transaction lifecycle states on the ownership map. `{Active, Committing,
/// Preparing, Prepared, RollingBack}` count as "TX active"; everything else
/// (notably `NoTransaction`) does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    NoTransaction,
    Active,
    Preparing,
    Prepared,
    Committing,
    RollingBack,
    Committed,
    RolledBack,
}

impl TxStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TxStatus::Active
                | TxStatus::Committing
                | TxStatus::Preparing
                | TxStatus::Prepared
                | TxStatus::RollingBack
        )
    }
}

/// Handle to a transaction opened on the ownership map. Opaque to callers;
/// only the lock coordinator interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub u64);

/// Cluster-visible mapping {lock key -> node IP of the writer that last
/// populated the shared copy}, doubling as a distributed advisory lock
/// service. Locking is advisory: only cooperating nodes respect it.
#[async_trait]
pub trait OwnershipMap: Send + Sync {
    async fn put(&self, key: &str, node_ip: &str) -> Result<()>;
    async fn put_if_absent(&self, key: &str, node_ip: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Acquire a (possibly multi-key) advisory lock under `tx`. Callers
    /// must pass keys pre-sorted to impose a total lock order across
    /// resources (see `copy`, P6).
    async fn lock(&self, tx: TxId, keys: &[&str]) -> Result<()>;
    async fn unlock(&self, tx: TxId, key: &str) -> Result<()>;
    async fn is_locked(&self, key: &str) -> Result<bool>;
    async fn get_lock_owner(&self, key: &str) -> Result<Option<String>>;

    async fn begin_tx(&self) -> Result<TxId>;
    async fn commit(&self, tx: TxId) -> Result<()>;
    async fn rollback(&self, tx: TxId) -> Result<()>;
    async fn tx_status(&self, tx: TxId) -> Result<TxStatus>;

    /// Register a callback invoked with a lock key on cluster-side
    /// expiration of that entry. Used by the local-expiration listener (C9)
    /// to evict the corresponding local copy.
    async fn add_listener(&self, listener: ExpirationListener) -> Result<()>;
}

/// Callback fired with a lock key when the ownership map expires that
/// entry. Synchronous by signature; implementations that need to do async
/// work (e.g. deleting a local file) spawn a task from within the callback.
pub type ExpirationListener = Arc<dyn Fn(String) + Send + Sync>;

/// In-memory `OwnershipMap` for tests and single-node deployments. Locks are
/// held in-process only; there is no real cluster to cooperate with.
#[derive(Default)]
pub struct InMemoryOwnershipMap {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    owners: HashMap<String, String>,
    locks: HashMap<String, TxId>,
    next_tx: u64,
    tx_status: HashMap<TxId, TxStatus>,
    listeners: Vec<ExpirationListener>,
}

impl InMemoryOwnershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a cluster-side expiration event for `key`. There is no real
    /// TTL eviction in this in-memory map; production ownership maps (e.g.
    /// an Infinispan cluster) drive this from their own expiration thread.
    pub fn fire_expiration(&self, key: &str) {
        let listeners = self.inner.lock().unwrap().listeners.clone();
        for listener in listeners {
            listener(key.to_string());
        }
    }
}

#[async_trait]
impl OwnershipMap for InMemoryOwnershipMap {
    async fn put(&self, key: &str, node_ip: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .owners
            .insert(key.to_string(), node_ip.to_string());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, node_ip: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .owners
            .entry(key.to_string())
            .or_insert_with(|| node_ip.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.lock().unwrap().owners.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().owners.get(key).cloned())
    }

    async fn lock(&self, tx: TxId, keys: &[&str]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for key in keys {
            inner.locks.insert(key.to_string(), tx);
        }
        Ok(())
    }

    async fn unlock(&self, tx: TxId, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.get(key) == Some(&tx) {
            inner.locks.remove(key);
        }
        Ok(())
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().locks.contains_key(key))
    }

    async fn get_lock_owner(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.locks.get(key).map(|tx| format!("tx-{}", tx.0)))
    }

    async fn begin_tx(&self) -> Result<TxId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_tx += 1;
        let tx = TxId(inner.next_tx);
        inner.tx_status.insert(tx, TxStatus::Active);
        Ok(tx)
    }

    async fn commit(&self, tx: TxId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.locks.retain(|_, holder| *holder != tx);
        inner.tx_status.insert(tx, TxStatus::Committed);
        Ok(())
    }

    async fn rollback(&self, tx: TxId) -> Result<()> {
        self.inner.lock().unwrap().locks.retain(|_, holder| *holder != tx);
        self.inner
            .lock()
            .unwrap()
            .tx_status
            .insert(tx, TxStatus::RolledBack);
        Ok(())
    }

    async fn tx_status(&self, tx: TxId) -> Result<TxStatus> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tx_status
            .get(&tx)
            .copied()
            .unwrap_or(TxStatus::NoTransaction))
    }

    async fn add_listener(&self, listener: ExpirationListener) -> Result<()> {
        self.inner.lock().unwrap().listeners.push(listener);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_identity_distinguishes_location_and_path() {
        let a = Resource::new("repo-a", "foo/bar.jar");
        let b = Resource::new("repo-b", "foo/bar.jar");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn path_generator_honors_alt_storage_location() {
        let gen = DefaultPathGenerator::new("/shared/root");
        let r = Resource::new("repo", "a/b.jar").with_alt_storage_location("/alt/root");
        assert_eq!(gen.path_for(&r), PathBuf::from("/alt/root/a/b.jar"));

        let r2 = Resource::new("repo", "a/b.jar");
        assert_eq!(gen.path_for(&r2), PathBuf::from("/shared/root/a/b.jar"));
    }

    #[tokio::test]
    async fn in_memory_ownership_map_lock_lifecycle() {
        let map = InMemoryOwnershipMap::new();
        let tx = map.begin_tx().await.unwrap();
        assert!(map.tx_status(tx).await.unwrap().is_active());

        map.lock(tx, &["k1"]).await.unwrap();
        assert!(map.is_locked("k1").await.unwrap());
        assert!(map.get_lock_owner("k1").await.unwrap().is_some());

        map.unlock(tx, "k1").await.unwrap();
        assert!(!map.is_locked("k1").await.unwrap());

        map.commit(tx).await.unwrap();
        assert!(!map.tx_status(tx).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn put_if_absent_does_not_clobber_existing_owner() {
        let map = InMemoryOwnershipMap::new();
        map.put("k", "10.0.0.1").await.unwrap();
        map.put_if_absent("k", "10.0.0.2").await.unwrap();
        assert_eq!(map.get("k").await.unwrap().as_deref(), Some("10.0.0.1"));
    }
}

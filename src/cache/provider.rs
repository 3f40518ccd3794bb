//! Public operations (C8).
//!
//! `CacheProvider` is the façade the file-transfer layer actually talks to.
//! It wires together every other component in this module: C1's key
//! derivation, C2's per-resource mutex, C4/C5's cluster lock coordinator,
//! C6's dual stream, C7's copy task, C9's expiration listener and C10's
//! stream registry.

use crate::cache::collaborators::{LocalCacheProvider, LockLevel, OwnershipMap, PathGenerator, Resource};
use crate::cache::copy_task::{spawn_copy, CopyGate};
use crate::cache::dual_stream::DualOutputStream;
use crate::cache::expiration::{self, ExpirationMap};
use crate::cache::file_lock::FileLockFacade;
use crate::cache::key::key_for;
use crate::cache::lock_coordinator::LockCoordinator;
use crate::cache::mutex_registry::{MutexRegistry, DEFAULT_TIMEOUT};
use crate::cache::stream_registry::StreamRegistry;
use crate::config::CacheConfig;
use crate::err::{CacheError, Result};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex as AsyncMutex;

/// Handle returned by [`CacheProvider::open_output`]. Thin wrapper around
/// the shared dual stream so the caller can write/close without holding a
/// `&mut` borrow across awaits, and so C10 can independently force-close it.
#[derive(Clone)]
pub struct CacheOutputStream {
    inner: Arc<AsyncMutex<DualOutputStream>>,
}

impl CacheOutputStream {
    pub async fn write(&self, buf: &[u8]) -> Result<()> {
        self.inner.lock().await.write(buf).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.lock().await.flush().await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.lock().await.close().await
    }
}

pub struct CacheProvider {
    path_generator: Arc<dyn PathGenerator>,
    local: Arc<dyn LocalCacheProvider>,
    ownership_map: Arc<dyn OwnershipMap>,
    mutex_registry: MutexRegistry,
    coordinator: Arc<LockCoordinator>,
    expiration_map: Arc<ExpirationMap>,
    stream_registry: StreamRegistry,
}

impl CacheProvider {
    pub async fn new(
        config: &CacheConfig,
        local: Arc<dyn LocalCacheProvider>,
        ownership_map: Arc<dyn OwnershipMap>,
    ) -> Result<Self> {
        let path_generator: Arc<dyn PathGenerator> = Arc::new(
            crate::cache::collaborators::DefaultPathGenerator::new(config.shared_root()),
        );
        let facade = Arc::new(FileLockFacade::new());
        let coordinator = Arc::new(LockCoordinator::new(facade, ownership_map.clone()));
        let expiration_map = Arc::new(ExpirationMap::new());

        expiration::attach(&ownership_map, expiration_map.clone(), local.clone()).await?;

        Ok(Self {
            path_generator,
            local,
            ownership_map,
            mutex_registry: MutexRegistry::new(),
            coordinator,
            expiration_map,
            stream_registry: StreamRegistry::new(),
        })
    }

    fn key_for(&self, resource: &Resource) -> Result<String> {
        key_for(self.path_generator.as_ref(), resource)
    }

    fn current_node_ip(&self) -> Result<String> {
        Ok(crate::net::current_node_ip()?.to_string())
    }

    /// §4.5.1.
    pub async fn open_input(
        &self,
        resource: &Resource,
    ) -> Result<Option<Box<dyn AsyncRead + Send + Unpin>>> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                if self.local.exists(resource).await? {
                    return self.local.open_input(resource).await;
                }

                let gate = CopyGate::new();
                let _handle = spawn_copy(
                    self.coordinator.clone(),
                    self.local.clone(),
                    self.path_generator.clone(),
                    resource.clone(),
                    key.clone(),
                    self.expiration_map.clone(),
                    gate.clone(),
                );

                if !gate.wait().await {
                    return Ok(None);
                }
                self.local.open_input(resource).await
            })
            .await
    }

    /// §4.5.2. On any failure before the dual stream is constructed, the
    /// cluster lock acquired by `acquire` is released with `should_commit =
    /// false` so no lock or TX is ever leaked (preserves I5).
    pub async fn open_output(&self, resource: &Resource) -> Result<CacheOutputStream> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                self.do_open_output(resource, &key).await
            })
            .await
    }

    async fn do_open_output(&self, resource: &Resource, key: &str) -> Result<CacheOutputStream> {
        self.coordinator.acquire(key, LockLevel::Write).await?;

        let attempt = async {
            let node_ip = self.current_node_ip()?;
            self.ownership_map.put(key, &node_ip).await?;

            let local_out = self.local.open_output(resource).await?;

            let shared_path = self.path_generator.path_for(resource);
            crate::fs::fs_op::ensure_file_exists(&shared_path).await?;
            let shared_out = tokio::fs::File::create(&shared_path).await?;

            Ok::<_, CacheError>((local_out, shared_out))
        }
        .await;

        let (local_out, shared_out) = match attempt {
            Ok(pair) => pair,
            Err(e) => {
                if let Err(release_err) = self.coordinator.release(key, false).await {
                    crate::global_var::LOGGER.warn(format!(
                        "open_output rollback failed for {}: {}",
                        key, release_err
                    ));
                }
                return Err(e);
            }
        };

        let stream = DualOutputStream::new(
            local_out,
            Box::new(shared_out),
            self.coordinator.clone(),
            key.to_string(),
            resource.clone(),
            self.expiration_map.clone(),
        );
        let inner = Arc::new(AsyncMutex::new(stream));
        self.stream_registry.register(&inner);
        Ok(CacheOutputStream { inner })
    }

    /// §4.5.3.
    pub async fn delete(&self, resource: &Resource) -> Result<bool> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                if self.local.is_read_locked(resource).await? || self.local.is_write_locked(resource).await? {
                    return Ok(false);
                }
                if !self.local.delete(resource).await? {
                    return Ok(false);
                }

                self.coordinator.acquire(&key, LockLevel::Delete).await?;
                let outcome = async {
                    self.ownership_map.remove(&key).await?;
                    let shared_path = self.path_generator.path_for(resource);
                    match tokio::fs::remove_file(&shared_path).await {
                        Ok(()) => Ok(true),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                        Err(e) => Err(CacheError::from(e)),
                    }
                }
                .await;
                self.coordinator.release(&key, false).await?;
                self.expiration_map.untrack(&key);
                outcome
            })
            .await
    }

    /// §4.5.4. No per-resource mutex: two resources are involved and taking
    /// both mutexes would risk a deadlock against a concurrent reverse copy.
    pub async fn copy(&self, from: &Resource, to: &Resource) -> Result<()> {
        let from_key = self.key_for(from)?;
        let to_key = self.key_for(to)?;
        let mut keys = [from_key.as_str(), to_key.as_str()];
        keys.sort_unstable();

        let tx = self.ownership_map.begin_tx().await?;
        let attempt = async {
            self.ownership_map.lock(tx, &keys).await?;
            self.local.copy(from, to).await?;

            let from_shared = self.path_generator.path_for(from);
            let to_shared = self.path_generator.path_for(to);
            crate::fs::fs_op::ensure_file_exists(&to_shared).await?;
            tokio::fs::copy(&from_shared, &to_shared).await?;

            let node_ip = self.current_node_ip()?;
            self.ownership_map.put_if_absent(&to_key, &node_ip).await?;
            Ok(())
        }
        .await;

        match attempt {
            Ok(()) => self.ownership_map.commit(tx).await,
            Err(e) => {
                if let Err(rollback_err) = self.ownership_map.rollback(tx).await {
                    crate::global_var::LOGGER
                        .warn(format!("copy rollback failed: {}", rollback_err));
                }
                Err(e)
            }
        }
    }

    /// §4.5.6.
    pub async fn mkdirs(&self, resource: &Resource) -> Result<()> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                self.coordinator.acquire(&key, LockLevel::Write).await?;
                let result = async {
                    let path = self.path_generator.path_for(resource);
                    tokio::fs::create_dir_all(&path).await?;
                    Ok(())
                }
                .await;
                self.coordinator.release(&key, false).await?;
                result
            })
            .await
    }

    /// §4.5.6.
    pub async fn create_file(&self, resource: &Resource) -> Result<()> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                self.coordinator.acquire(&key, LockLevel::Write).await?;
                let path = self.path_generator.path_for(resource);
                let result = crate::fs::fs_op::ensure_file_exists(&path).await;
                self.coordinator.release(&key, false).await?;
                result
            })
            .await
    }

    /// §4.5.5: `local.exists ∨ shared_exists`.
    pub async fn exists(&self, resource: &Resource) -> Result<bool> {
        if self.local.exists(resource).await? {
            return Ok(true);
        }
        let shared_path = self.path_generator.path_for(resource);
        Ok(tokio::fs::try_exists(&shared_path).await?)
    }

    /// §4.5.5: reads the shared file, the stable reference during an
    /// in-progress shared→local copy. Never throws: missing file is 0.
    pub async fn length(&self, resource: &Resource) -> u64 {
        let shared_path = self.path_generator.path_for(resource);
        tokio::fs::metadata(&shared_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// §4.5.5. Seconds since the Unix epoch, or 0 if unavailable.
    pub async fn last_modified(&self, resource: &Resource) -> u64 {
        let shared_path = self.path_generator.path_for(resource);
        let Ok(meta) = tokio::fs::metadata(&shared_path).await else {
            return 0;
        };
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// §4.5.5: lists the shared directory only.
    pub async fn list(&self, resource: &Resource) -> Result<Vec<String>> {
        let shared_path = self.path_generator.path_for(resource);
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&shared_path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(entries)
    }

    /// §4.5.5: run under C2 with the default timeout so a stat doesn't
    /// deadlock against an ongoing lock dance.
    pub async fn is_read_locked(&self, resource: &Resource) -> Result<bool> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                Ok(self.local.is_read_locked(resource).await? || self.ownership_map.is_locked(&key).await?)
            })
            .await
    }

    pub async fn is_write_locked(&self, resource: &Resource) -> Result<bool> {
        let key = self.key_for(resource)?;
        self.mutex_registry
            .try_lock_and(&resource.identity(), DEFAULT_TIMEOUT, || async {
                Ok(self.local.is_write_locked(resource).await? || self.ownership_map.is_locked(&key).await?)
            })
            .await
    }

    pub async fn wait_for_read_unlock(&self, resource: &Resource) -> Result<()> {
        let key = self.key_for(resource)?;
        self.local.wait_for_read_unlock(resource).await?;
        self.coordinator
            .wait_for_foreign_lock(&key, std::time::Duration::from_secs(600))
            .await
    }

    pub async fn wait_for_write_unlock(&self, resource: &Resource) -> Result<()> {
        let key = self.key_for(resource)?;
        self.local.wait_for_write_unlock(resource).await?;
        self.coordinator
            .wait_for_foreign_lock(&key, std::time::Duration::from_secs(600))
            .await
    }

    /// C10: force-close every stream still open on the current context.
    pub async fn cleanup_current_thread(&self) {
        self.stream_registry
            .cleanup_current_thread(self.local.as_ref())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::collaborators::InMemoryOwnershipMap;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tokio::io::AsyncWrite;

    struct FsBackedLocal {
        root: PathBuf,
    }

    #[async_trait]
    impl LocalCacheProvider for FsBackedLocal {
        async fn open_input(
            &self,
            resource: &Resource,
        ) -> Result<Option<Box<dyn AsyncRead + Send + Unpin>>> {
            let path = self.root.join(&resource.path);
            match tokio::fs::File::open(&path).await {
                Ok(f) => Ok(Some(Box::new(f))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
        async fn open_output(&self, resource: &Resource) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
            let path = self.root.join(&resource.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Ok(Box::new(tokio::fs::File::create(&path).await?))
        }
        async fn exists(&self, resource: &Resource) -> Result<bool> {
            Ok(tokio::fs::try_exists(self.root.join(&resource.path)).await?)
        }
        async fn delete(&self, resource: &Resource) -> Result<bool> {
            match tokio::fs::remove_file(self.root.join(&resource.path)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        async fn copy(&self, from: &Resource, to: &Resource) -> Result<()> {
            let from_path = self.root.join(&from.path);
            let to_path = self.root.join(&to.path);
            if let Some(parent) = to_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&from_path, &to_path).await?;
            Ok(())
        }
        async fn is_read_locked(&self, _resource: &Resource) -> Result<bool> {
            Ok(false)
        }
        async fn is_write_locked(&self, _resource: &Resource) -> Result<bool> {
            Ok(false)
        }
        async fn wait_for_read_unlock(&self, _resource: &Resource) -> Result<()> {
            Ok(())
        }
        async fn wait_for_write_unlock(&self, _resource: &Resource) -> Result<()> {
            Ok(())
        }
        fn detached_file(&self, resource: &Resource) -> PathBuf {
            self.root.join(&resource.path)
        }
    }

    struct Harness {
        provider: CacheProvider,
        _shared_root: PathBuf,
        local_root: PathBuf,
    }

    fn unique_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut p = std::env::temp_dir();
        p.push(format!("{}_{}_{}", prefix, std::process::id(), ts));
        p
    }

    async fn harness(prefix: &str) -> Harness {
        let shared_root = unique_dir(&format!("{}_shared", prefix));
        let local_root = unique_dir(&format!("{}_local", prefix));
        tokio::fs::create_dir_all(&shared_root).await.unwrap();
        tokio::fs::create_dir_all(&local_root).await.unwrap();

        let config = CacheConfig::new(Some(shared_root.to_str().unwrap())).unwrap();
        let local: Arc<dyn LocalCacheProvider> = Arc::new(FsBackedLocal {
            root: local_root.clone(),
        });
        let ownership_map: Arc<dyn OwnershipMap> = Arc::new(InMemoryOwnershipMap::new());
        let provider = CacheProvider::new(&config, local, ownership_map).await.unwrap();

        Harness {
            provider,
            _shared_root: shared_root,
            local_root,
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self._shared_root);
            let _ = std::fs::remove_dir_all(&self.local_root);
        }
    }

    #[tokio::test]
    async fn write_then_read_then_delete_then_verify_absence() {
        let h = harness("e2e_write_delete").await;
        let resource = Resource::new("repo", "artifact.jar");

        let out = h.provider.open_output(&resource).await.unwrap();
        out.write(b"HELLO").await.unwrap();
        out.close().await.unwrap();

        assert!(h.provider.exists(&resource).await.unwrap());
        let key = h.provider.key_for(&resource).unwrap();
        assert_eq!(
            h.provider.ownership_map.get(&key).await.unwrap().as_deref(),
            Some(crate::net::current_node_ip().unwrap().to_string().as_str())
        );

        let deleted = h.provider.delete(&resource).await.unwrap();
        assert!(deleted);
        assert!(!h.provider.exists(&resource).await.unwrap());
        assert!(h.provider.ownership_map.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nested_writes_under_one_transaction_commit_once() {
        let h = harness("e2e_nested").await;
        let r1 = Resource::new("repo", "module/foo.jar");
        let r2 = Resource::new("repo", "module/foo.jar.sha1");

        let out1 = h.provider.open_output(&r1).await.unwrap();
        out1.write(b"JAR").await.unwrap();
        let out2 = h.provider.open_output(&r2).await.unwrap();
        out2.write(b"SHA1").await.unwrap();

        out2.close().await.unwrap();
        // Outer resource still holds the nested key; no commit observed yet.
        let key = h.provider.key_for(&r1).unwrap();
        assert!(h.provider.ownership_map.is_locked(&key).await.unwrap());

        out1.close().await.unwrap();
        assert!(!h.provider.ownership_map.is_locked(&key).await.unwrap());
    }

    #[tokio::test]
    async fn shared_miss_returns_none_quickly() {
        let h = harness("e2e_miss").await;
        let resource = Resource::new("repo", "absent.jar");

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            h.provider.open_input(&resource),
        )
        .await
        .expect("open_input should not hang")
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn read_miss_populates_local_tier_from_shared() {
        let h = harness("e2e_read_miss").await;
        tokio::fs::write(h._shared_root.join("present.txt"), b"FROM SHARED")
            .await
            .unwrap();
        let resource = Resource::new("repo", "present.txt");

        let mut input = h
            .provider
            .open_input(&resource)
            .await
            .unwrap()
            .expect("should populate from shared tier");
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut input, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"FROM SHARED");
    }

    #[tokio::test]
    async fn copy_duplicates_artifact_into_destination() {
        let h = harness("e2e_copy").await;
        let from = Resource::new("repo", "src.jar");
        let to = Resource::new("repo", "dst.jar");

        let out = h.provider.open_output(&from).await.unwrap();
        out.write(b"PAYLOAD").await.unwrap();
        out.close().await.unwrap();

        h.provider.copy(&from, &to).await.unwrap();
        assert!(h.provider.exists(&to).await.unwrap());
        let local_copy = tokio::fs::read(h.local_root.join("dst.jar")).await.unwrap();
        assert_eq!(local_copy, b"PAYLOAD");
    }
}

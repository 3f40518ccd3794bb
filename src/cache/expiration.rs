//! Local-file expiration map and listener (C9).
//!
//! `ExpirationMap` is the local bookkeeping structure the dual stream (C6)
//! and the miss-path copy task (C7) record into once they have a local file
//! worth evicting later; it correlates a lock key with the resource path
//! that backs it. `LocalExpirationListener` is the C9 component proper: it
//! subscribes to the ownership map's expiration callback and, on a
//! post-expiration event for a tracked key, deletes the corresponding local
//! copy and untracks the key. Failures are logged, not thrown.

use crate::cache::collaborators::{LocalCacheProvider, OwnershipMap, Resource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct ExpirationMap {
    entries: Mutex<HashMap<String, (String, String)>>,
}

impl ExpirationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key`'s local copy backs `resource`.
    pub fn track(&self, key: &str, resource: &Resource) {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            (resource.location.clone(), resource.path.display().to_string()),
        );
    }

    /// Drop the tracking entry for `key`, e.g. after an explicit `delete`.
    pub fn untrack(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn resource_for(&self, key: &str) -> Option<Resource> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(location, path)| Resource::new(location.clone(), path.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Installs the post-expiration callback on `ownership_map`: on expiration
/// of a tracked key, deletes the corresponding local copy and untracks it.
pub async fn attach(
    ownership_map: &Arc<dyn OwnershipMap>,
    expiration_map: Arc<ExpirationMap>,
    local: Arc<dyn LocalCacheProvider>,
) -> crate::err::Result<()> {
    let listener: crate::cache::collaborators::ExpirationListener = Arc::new(move |key: String| {
        let expiration_map = expiration_map.clone();
        let local = local.clone();
        let Some(resource) = expiration_map.resource_for(&key) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = local.delete(&resource).await {
                crate::global_var::LOGGER.warn(format!(
                    "local-expiration listener failed to delete {}: {}",
                    resource.identity(),
                    e
                ));
            }
            expiration_map.untrack(&key);
        });
    });
    ownership_map.add_listener(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::collaborators::InMemoryOwnershipMap;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncRead, AsyncWrite};

    struct RecordingLocal {
        deleted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LocalCacheProvider for RecordingLocal {
        async fn open_input(
            &self,
            _resource: &Resource,
        ) -> crate::err::Result<Option<Box<dyn AsyncRead + Send + Unpin>>> {
            Ok(None)
        }
        async fn open_output(
            &self,
            _resource: &Resource,
        ) -> crate::err::Result<Box<dyn AsyncWrite + Send + Unpin>> {
            unreachable!()
        }
        async fn exists(&self, _resource: &Resource) -> crate::err::Result<bool> {
            Ok(false)
        }
        async fn delete(&self, _resource: &Resource) -> crate::err::Result<bool> {
            self.deleted.store(true, Ordering::SeqCst);
            Ok(true)
        }
        async fn copy(&self, _from: &Resource, _to: &Resource) -> crate::err::Result<()> {
            Ok(())
        }
        async fn is_read_locked(&self, _resource: &Resource) -> crate::err::Result<bool> {
            Ok(false)
        }
        async fn is_write_locked(&self, _resource: &Resource) -> crate::err::Result<bool> {
            Ok(false)
        }
        async fn wait_for_read_unlock(&self, _resource: &Resource) -> crate::err::Result<()> {
            Ok(())
        }
        async fn wait_for_write_unlock(&self, _resource: &Resource) -> crate::err::Result<()> {
            Ok(())
        }
        fn detached_file(&self, _resource: &Resource) -> PathBuf {
            PathBuf::new()
        }
    }

    #[tokio::test]
    async fn expiration_event_deletes_tracked_local_copy() {
        let concrete = Arc::new(InMemoryOwnershipMap::new());
        let ownership_map: Arc<dyn OwnershipMap> = concrete.clone();
        let expiration_map = Arc::new(ExpirationMap::new());
        let deleted = Arc::new(AtomicBool::new(false));
        let local = Arc::new(RecordingLocal {
            deleted: deleted.clone(),
        });

        expiration_map.track("key-1", &Resource::new("repo", "a/b.jar"));
        attach(&ownership_map, expiration_map.clone(), local)
            .await
            .unwrap();

        concrete.fire_expiration("key-1");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(deleted.load(Ordering::SeqCst));
        assert!(expiration_map.resource_for("key-1").is_none());
    }
}

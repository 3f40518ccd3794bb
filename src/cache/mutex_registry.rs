//! Per-resource mutex registry (C2).
//!
//! A weakly-held mapping {resource -> mutex} so a resource's mutex is
//! dropped once no in-flight operation references it anymore, rather than
//! growing the registry forever. `try_lock_and` is the sole entry point:
//! look up or create the resource's mutex, acquire it within `timeout`, run
//! the task, and release.

use crate::err::{CacheError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Default timeout for all public operations that take one, per the design:
/// a strictly positive timeout is mandatory; non-positive means "block
/// interruptibly" with no bound.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub struct MutexRegistry {
    entries: StdMutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }

    /// Look up or create the mutex for `resource_id`. Stale (dropped) weak
    /// entries are replaced rather than accumulated.
    fn get_or_create(&self, resource_id: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(resource_id).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(AsyncMutex::new(()));
        entries.insert(resource_id.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    /// Number of resources currently tracked, including entries whose mutex
    /// has already been dropped (useful only for test assertions about
    /// registry growth).
    pub fn tracked_len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Acquire the mutex for `resource_id` within `timeout`, run `task`
    /// while holding it, then release. A non-positive `timeout` blocks
    /// without a bound.
    pub async fn try_lock_and<T, F, Fut>(
        &self,
        resource_id: &str,
        timeout: Duration,
        task: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mutex = self.get_or_create(resource_id);

        let _guard = if timeout.is_zero() {
            mutex.lock_owned().await
        } else {
            match tokio::time::timeout(timeout, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    return Err(CacheError::timeout(format!(
                        "did not get lock for resource {} in {:?}",
                        resource_id, timeout
                    )));
                }
            }
        };

        task().await
    }
}

impl Default for MutexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

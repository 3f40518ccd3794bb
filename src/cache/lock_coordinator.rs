//! Cluster-map lock coordinator (C4) and TX file counter (C5).
//!
//! Folds C5 into C4's state rather than keeping a separate ambient
//! thread-local: each context (tokio task) owns one [`TxState`] recording
//! the transaction it is nested under and how many ownership-map locks it
//! currently holds under that transaction. The counter reaching zero is the
//! sole trigger for `commit`/`rollback`, matching the design note's
//! preference for an explicit, drop-free coalescing counter over ambient
//! thread-local state.

use crate::cache::collaborators::{OwnershipMap, TxId};
use crate::cache::file_lock::FileLockFacade;
use crate::err::{CacheError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FOREIGN_LOCK_TIMEOUT: Duration = Duration::from_secs(600);
const FOREIGN_LOCK_POLL: Duration = Duration::from_millis(1000);

type ContextId = Option<tokio::task::Id>;

#[derive(Default)]
struct TxState {
    tx: Option<TxId>,
    counter: u64,
}

pub struct LockCoordinator {
    facade: Arc<FileLockFacade>,
    ownership_map: Arc<dyn OwnershipMap>,
    tx_state: Mutex<HashMap<ContextId, TxState>>,
}

impl LockCoordinator {
    pub fn new(facade: Arc<FileLockFacade>, ownership_map: Arc<dyn OwnershipMap>) -> Self {
        Self {
            facade,
            ownership_map,
            tx_state: Mutex::new(HashMap::new()),
        }
    }

    fn here() -> ContextId {
        tokio::task::try_id()
    }

    /// Current transaction for this context, if any is open.
    pub fn current_tx(&self) -> Option<TxId> {
        self.tx_state
            .lock()
            .unwrap()
            .get(&Self::here())
            .and_then(|s| s.tx)
    }

    /// Acquire the file-lock facade entry for `key`, then the cluster-map
    /// advisory lock, opening a TX for this context if one is not already
    /// active. Per §4.4.
    pub async fn acquire(&self, key: &str, level: crate::cache::collaborators::LockLevel) -> Result<()> {
        self.facade.lock(key, level).await;

        self.wait_for_foreign_lock(key, FOREIGN_LOCK_TIMEOUT).await?;

        let here = Self::here();
        let tx = {
            let mut state = self.tx_state.lock().unwrap();
            let entry = state.entry(here).or_default();
            match entry.tx {
                Some(tx) => tx,
                None => {
                    drop(state);
                    let tx = self.ownership_map.begin_tx().await?;
                    let mut state = self.tx_state.lock().unwrap();
                    state.entry(here).or_default().tx = Some(tx);
                    tx
                }
            }
        };

        let tx_active = self.ownership_map.tx_status(tx).await?.is_active();
        let already_locked = self.ownership_map.is_locked(key).await?;
        if !already_locked && tx_active {
            self.ownership_map.lock(tx, &[key]).await?;
            self.tx_state
                .lock()
                .unwrap()
                .entry(here)
                .or_default()
                .counter += 1;
        }
        Ok(())
    }

    /// Release `key`, committing or rolling back the TX once the outermost
    /// holder on this context releases. Per §4.4.
    pub async fn release(&self, key: &str, should_commit: bool) -> Result<()> {
        self.facade.unlock(key)?;

        if self.facade.context_lock_count(key) != 0 {
            return Ok(());
        }

        let here = Self::here();
        let tx = {
            let state = self.tx_state.lock().unwrap();
            state.get(&here).and_then(|s| s.tx)
        };
        let Some(tx) = tx else {
            return Ok(());
        };

        let tx_active = self.ownership_map.tx_status(tx).await?.is_active();
        if tx_active && self.ownership_map.is_locked(key).await? {
            self.ownership_map.unlock(tx, key).await?;
            let mut state = self.tx_state.lock().unwrap();
            if let Some(s) = state.get_mut(&here) {
                s.counter = s.counter.saturating_sub(1);
            }
        }

        let counter = self
            .tx_state
            .lock()
            .unwrap()
            .get(&here)
            .map(|s| s.counter)
            .unwrap_or(0);

        if counter == 0 {
            let result = if should_commit {
                self.ownership_map.commit(tx).await
            } else {
                Err(CacheError::illegal_state("rollback requested"))
            };
            if result.is_err() {
                self.ownership_map
                    .rollback(tx)
                    .await
                    .map_err(|e| CacheError::illegal_state(format!("rollback failed: {}", e)))?;
            }
            self.tx_state.lock().unwrap().remove(&here);
        }
        Ok(())
    }

    /// Block until `key` is not held by a foreign context on the ownership
    /// map, or until `timeout` elapses. Re-entrant: a context already
    /// holding `key` via the file-lock facade returns immediately. Per
    /// §4.4.
    pub async fn wait_for_foreign_lock(&self, key: &str, timeout: Duration) -> Result<()> {
        if self.facade.is_locked_by_current_thread(key) {
            return Ok(());
        }
        let mut waited = Duration::ZERO;
        loop {
            if self.ownership_map.get_lock_owner(key).await?.is_none() {
                return Ok(());
            }
            if waited >= timeout {
                return Err(CacheError::timeout(format!("ISPN lock timeout: {}", key)));
            }
            tokio::time::sleep(FOREIGN_LOCK_POLL).await;
            waited += FOREIGN_LOCK_POLL;
        }
    }

    /// Best-effort check used only by the dual stream's pathological
    /// double-close path; errors are treated as "not locked".
    pub async fn ownership_map_reports_locked(&self, key: &str) -> bool {
        self.ownership_map.is_locked(key).await.unwrap_or(false)
    }
}

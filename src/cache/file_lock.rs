//! In-process file-lock manager facade (C3).
//!
//! A thin per-key lock keyed by the C1 lock key, not by resource: two
//! resources that share a parent-directory key (`foo.jar` and
//! `foo.jar.sha1`) contend on the same facade entry even though they are
//! different [`Resource`]s and therefore different C2 mutexes. The facade
//! tracks re-entrant stacking so the cluster-map lock coordinator (C4) knows
//! when the *last* nested holder on this context has released the key.
//!
//! "Current thread" in the original design becomes "current tokio task"
//! here: re-entrance is keyed by [`tokio::task::Id`], the closest in-process
//! analogue to thread identity available to async code.

use crate::cache::collaborators::LockLevel;
use crate::err::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::Notify;

type ContextId = Option<tokio::task::Id>;

fn current_context() -> ContextId {
    tokio::task::try_id()
}

struct KeyState {
    holder: ContextId,
    level: LockLevel,
    count: u64,
}

pub struct FileLockFacade {
    state: Mutex<HashMap<String, KeyState>>,
    notify: Notify,
}

impl FileLockFacade {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Acquire `key` at `level` for the current context. Blocks
    /// (interruptibly, i.e. cancel-safe) until free or already held by this
    /// context, in which case the hold count is simply incremented.
    pub async fn lock(&self, key: &str, level: LockLevel) {
        let here = current_context();
        loop {
            {
                let mut state = self.state.lock().unwrap();
                let entry = state.entry(key.to_string()).or_insert(KeyState {
                    holder: here,
                    level,
                    count: 0,
                });
                if entry.count == 0 || entry.holder == here {
                    entry.holder = here;
                    entry.level = level;
                    entry.count += 1;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release one level of nesting on `key` for the current context.
    /// `Io`-classified only in the sense the caller maps an unexpected state
    /// (unlocking a key this context does not hold) to `IllegalState`.
    pub fn unlock(&self, key: &str) -> Result<()> {
        let here = current_context();
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.get_mut(key) {
            if entry.holder != here {
                return Err(crate::err::CacheError::illegal_state(format!(
                    "unlock({}) called by a context that does not hold it",
                    key
                )));
            }
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                state.remove(key);
                self.notify.notify_waiters();
            }
        }
        Ok(())
    }

    pub fn is_locked_by_current_thread(&self, key: &str) -> bool {
        let here = current_context();
        self.state
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|s| s.holder == here && s.count > 0)
    }

    /// Nesting depth held by the current context on `key`. `C4.release`
    /// treats zero as "last holder, safe to unlock the cluster lock".
    pub fn context_lock_count(&self, key: &str) -> u64 {
        let here = current_context();
        self.state
            .lock()
            .unwrap()
            .get(key)
            .filter(|s| s.holder == here)
            .map(|s| s.count)
            .unwrap_or(0)
    }
}

impl Default for FileLockFacade {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-context stream registry (C10).
//!
//! Tracks weak references to every dual stream opened on the current
//! context (tokio task), so a leaked stream can be force-closed by
//! `cleanup_current_thread` instead of holding its cluster lock forever.

use crate::cache::dual_stream::DualOutputStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Mutex as AsyncMutex;

type ContextId = Option<tokio::task::Id>;

#[derive(Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<ContextId, Vec<Weak<AsyncMutex<DualOutputStream>>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn here() -> ContextId {
        tokio::task::try_id()
    }

    pub fn register(&self, stream: &Arc<AsyncMutex<DualOutputStream>>) {
        self.streams
            .lock()
            .unwrap()
            .entry(Self::here())
            .or_default()
            .push(Arc::downgrade(stream));
    }

    /// Force-close every stream still live on the current context and drop
    /// the set, delegating to `local`'s own cleanup afterwards.
    pub async fn cleanup_current_thread(&self, local: &dyn crate::cache::collaborators::LocalCacheProvider) {
        let live: Vec<_> = {
            let mut streams = self.streams.lock().unwrap();
            streams.remove(&Self::here()).unwrap_or_default()
        };
        for weak in live {
            if let Some(stream) = weak.upgrade() {
                let mut guard = stream.lock().await;
                let _ = guard.close().await;
            }
        }
        local.cleanup_current_context();
    }

    #[cfg(test)]
    pub fn tracked_count(&self) -> usize {
        self.streams
            .lock()
            .unwrap()
            .get(&Self::here())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

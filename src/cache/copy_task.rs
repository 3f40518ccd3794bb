//! Miss-path copy task (C7).
//!
//! Runs on a background tokio task, spawned by the public operations layer
//! (C8) on a read miss. Signals readability to the blocked caller as soon as
//! the local sink is open, well before the shared→local stream finishes, so
//! the caller can start reading behind the still-running writer (the local
//! provider's own journaling serializes that).

use crate::cache::collaborators::{LocalCacheProvider, LockLevel, PathGenerator, Resource};
use crate::cache::expiration::ExpirationMap;
use crate::cache::lock_coordinator::LockCoordinator;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct GateState {
    readable: bool,
    copy_error: bool,
}

/// The condition-variable pair shared between the copy task and the caller
/// blocked in `open_input`.
pub struct CopyGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl CopyGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState::default()),
            notify: Notify::new(),
        })
    }

    fn set_readable(&self) {
        self.state.lock().unwrap().readable = true;
        self.notify.notify_waiters();
    }

    fn set_copy_error(&self) {
        self.state.lock().unwrap().copy_error = true;
        self.notify.notify_waiters();
    }

    /// Block until readable or copy_error. Returns `true` if the local
    /// output stream is open and safe to read from, `false` on a miss.
    pub async fn wait(&self) -> bool {
        loop {
            {
                let s = self.state.lock().unwrap();
                if s.readable {
                    return true;
                }
                if s.copy_error {
                    return false;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Spawn the copy task for `resource`, keyed by `key`. Per §4.7:
/// 1. acquire the cluster lock for writing.
/// 2. if the shared file is missing, signal `copy_error` and stop.
/// 3. open shared input + local output, signal `readable`.
/// 4. stream to completion.
/// 5. guaranteed epilogue: release the lock (no commit), track expiration,
///    signal once more in case a reader is still waiting.
pub fn spawn_copy(
    coordinator: Arc<LockCoordinator>,
    local: Arc<dyn LocalCacheProvider>,
    path_generator: Arc<dyn PathGenerator>,
    resource: Resource,
    key: String,
    expiration_map: Arc<ExpirationMap>,
    gate: Arc<CopyGate>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = coordinator.acquire(&key, LockLevel::Write).await {
            crate::global_var::LOGGER.warn(format!("copy task failed to acquire {}: {}", key, e));
            gate.set_copy_error();
            return;
        }

        let shared_path = path_generator.path_for(&resource);

        let result = run_copy(&local, &resource, &shared_path, &gate).await;
        if let Err(e) = result {
            crate::global_var::LOGGER.warn(format!(
                "copy task failed for {}: {}",
                resource.identity(),
                e
            ));
            gate.set_copy_error();
        }

        if let Err(e) = coordinator.release(&key, false).await {
            crate::global_var::LOGGER.warn(format!(
                "copy task failed to release {}: {}",
                key, e
            ));
        }
        expiration_map.track(&key, &resource);
        gate.notify.notify_waiters();
    })
}

async fn run_copy(
    local: &Arc<dyn LocalCacheProvider>,
    resource: &Resource,
    shared_path: &std::path::Path,
    gate: &CopyGate,
) -> crate::err::Result<()> {
    if !tokio::fs::try_exists(shared_path).await? {
        gate.set_copy_error();
        return Ok(());
    }

    let mut shared_in = tokio::fs::File::open(shared_path).await?;
    let mut local_out = local.open_output(resource).await?;
    gate.set_readable();

    tokio::io::copy(&mut shared_in, &mut local_out).await?;
    use tokio::io::AsyncWriteExt;
    local_out.shutdown().await?;
    Ok(())
}

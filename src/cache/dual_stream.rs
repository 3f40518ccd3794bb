//! Dual output stream (C6).
//!
//! Mirrors every write to the local and shared sinks, in that order, and
//! commits or rolls back the cluster-map transaction exactly once on
//! `close`. `close` is idempotent: a pathological double-close after a
//! partial failure simply frees the lock if it is still held and returns.

use crate::cache::collaborators::Resource;
use crate::cache::lock_coordinator::LockCoordinator;
use crate::err::Result;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub struct DualOutputStream {
    local_out: Box<dyn AsyncWrite + Send + Unpin>,
    shared_out: Box<dyn AsyncWrite + Send + Unpin>,
    coordinator: Arc<LockCoordinator>,
    key: String,
    resource: Resource,
    expiration_map: Arc<crate::cache::expiration::ExpirationMap>,
    closed: bool,
}

impl DualOutputStream {
    pub fn new(
        local_out: Box<dyn AsyncWrite + Send + Unpin>,
        shared_out: Box<dyn AsyncWrite + Send + Unpin>,
        coordinator: Arc<LockCoordinator>,
        key: impl Into<String>,
        resource: Resource,
        expiration_map: Arc<crate::cache::expiration::ExpirationMap>,
    ) -> Self {
        Self {
            local_out,
            shared_out,
            coordinator,
            key: key.into(),
            resource,
            expiration_map,
            closed: false,
        }
    }

    /// Fan `buf` out to both sinks, local then shared. A failure from
    /// either sink propagates immediately; the other sink is not flushed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.local_out.write_all(buf).await?;
        self.shared_out.write_all(buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.local_out.flush().await?;
        self.shared_out.flush().await?;
        Ok(())
    }

    /// Idempotent single commit point. Per §4.6:
    /// 1. Already closed and the key still locked (pathological double
    ///    close): release without commit, return.
    /// 2. Otherwise: release(key, commit=true).
    /// 3. Always: quietly close both sinks and record the path for
    ///    expiration tracking. The `closed` flag is set only after release
    ///    succeeds, so a failed release leaves the stream closeable again.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            if self.coordinator.ownership_map_reports_locked(&self.key).await {
                self.coordinator.release(&self.key, false).await?;
            }
            return Ok(());
        }

        self.coordinator.release(&self.key, true).await?;
        self.closed = true;

        let _ = self.local_out.shutdown().await;
        let _ = self.shared_out.shutdown().await;
        self.expiration_map.track(&self.key, &self.resource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::collaborators::{InMemoryOwnershipMap, LockLevel};
    use crate::cache::expiration::ExpirationMap;
    use crate::cache::file_lock::FileLockFacade;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// An in-memory sink for exercising `DualOutputStream` without touching
    /// the filesystem.
    #[derive(Default)]
    struct VecSink(Vec<u8>);

    impl AsyncWrite for VecSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn stream_over() -> (DualOutputStream, Arc<LockCoordinator>) {
        let coordinator = Arc::new(LockCoordinator::new(
            Arc::new(FileLockFacade::new()),
            Arc::new(InMemoryOwnershipMap::new()),
        ));
        coordinator.acquire("k", LockLevel::Write).await.unwrap();
        let local = Box::new(VecSink::default());
        let shared = Box::new(VecSink::default());
        let stream = DualOutputStream::new(
            local,
            shared,
            coordinator.clone(),
            "k",
            Resource::new("repo", "a/b.jar"),
            Arc::new(ExpirationMap::new()),
        );
        (stream, coordinator)
    }

    #[tokio::test]
    async fn write_then_close_commits_and_releases() {
        let (mut stream, coordinator) = stream_over().await;
        stream.write(b"HELLO").await.unwrap();
        stream.close().await.unwrap();
        assert!(coordinator.current_tx().is_none());
    }

    #[tokio::test]
    async fn double_close_is_a_no_op() {
        let (mut stream, _coordinator) = stream_over().await;
        stream.write(b"HELLO").await.unwrap();
        stream.close().await.unwrap();
        stream.close().await.unwrap();
    }
}

//! Deferred, best-effort deletion of temporary artifacts
//!
//! Request handlers never wait on deletions: they push paths into a
//! [`CleanupQueue`] and a single background worker drains it. Deleting a file
//! that is already gone counts as success; any other failure is logged and
//! dropped, there is no retry.

use crate::storage::TempStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Message sent to the cleanup worker
enum CleanupMessage {
    Delete(PathBuf),
    Flush(oneshot::Sender<()>),
}

/// Counters reported by the worker once every queue handle is dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub removed: usize,
    pub already_gone: usize,
    pub failed: usize,
}

/// Cloneable handle for scheduling deletions
#[derive(Clone, Debug)]
pub struct CleanupQueue {
    sender: mpsc::UnboundedSender<CleanupMessage>,
}

impl CleanupQueue {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker exits after the last clone of the returned queue is dropped.
    pub fn spawn(storage: Arc<TempStorage>) -> (Self, JoinHandle<CleanupStats>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(storage, receiver));
        (Self { sender }, handle)
    }

    /// Schedule a path for deletion without waiting for it
    pub fn schedule(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.sender.send(CleanupMessage::Delete(path)).is_err() {
            error!("cleanup worker is gone, artifact will be left behind");
        }
    }

    pub fn schedule_all<I>(&self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for path in paths {
            self.schedule(path);
        }
    }

    /// Wait until every deletion scheduled before this call has been attempted
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(CleanupMessage::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_worker(
    storage: Arc<TempStorage>,
    mut receiver: mpsc::UnboundedReceiver<CleanupMessage>,
) -> CleanupStats {
    let mut stats = CleanupStats::default();

    while let Some(message) = receiver.recv().await {
        match message {
            CleanupMessage::Delete(path) => match storage.remove(&path).await {
                Ok(true) => {
                    info!(path = %path.display(), "removed temp artifact");
                    stats.removed += 1;
                }
                Ok(false) => {
                    debug!(path = %path.display(), "temp artifact already gone");
                    stats.already_gone += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove temp artifact");
                    stats.failed += 1;
                }
            },
            CleanupMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!(?stats, "cleanup worker stopped");
    stats
}

/// Schedules deletion of an artifact when dropped
#[derive(Debug)]
pub struct DeleteOnDrop {
    path: Option<PathBuf>,
    queue: CleanupQueue,
}

impl DeleteOnDrop {
    pub fn new(path: PathBuf, queue: CleanupQueue) -> Self {
        Self {
            path: Some(path),
            queue,
        }
    }

    /// Keep the artifact after all
    pub fn disarm(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.queue.schedule(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<TempStorage>) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(TempStorage::open(dir.path()).unwrap());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_scheduled_files_are_removed() {
        let (_dir, storage) = setup();
        let path = storage.resolve("t_song.wav").unwrap();
        std::fs::write(&path, b"x").unwrap();

        let (queue, _handle) = CleanupQueue::spawn(Arc::clone(&storage));
        queue.schedule(path.clone());
        queue.flush().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_double_delete_does_not_fail() {
        let (_dir, storage) = setup();
        let path = storage.resolve("t_twice.wav").unwrap();
        std::fs::write(&path, b"x").unwrap();

        let (queue, handle) = CleanupQueue::spawn(Arc::clone(&storage));
        queue.schedule(path.clone());
        queue.schedule(path.clone());
        queue.schedule(storage.resolve("t_never.wav").unwrap());
        drop(queue);

        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            CleanupStats {
                removed: 1,
                already_gone: 2,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_paths_outside_storage_are_refused() {
        let (dir, storage) = setup();
        let outside = dir.path().parent().unwrap().join("not-ours.txt");

        let (queue, handle) = CleanupQueue::spawn(storage);
        queue.schedule(outside);
        drop(queue);

        let stats = handle.await.unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_delete_on_drop_guard() {
        let (_dir, storage) = setup();
        let path = storage.resolve("t_guarded.zip").unwrap();
        std::fs::write(&path, b"zip").unwrap();

        let (queue, _handle) = CleanupQueue::spawn(Arc::clone(&storage));
        {
            let _guard = DeleteOnDrop::new(path.clone(), queue.clone());
        }
        queue.flush().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_disarmed_guard_keeps_file() {
        let (_dir, storage) = setup();
        let path = storage.resolve("t_kept.zip").unwrap();
        std::fs::write(&path, b"zip").unwrap();

        let (queue, _handle) = CleanupQueue::spawn(Arc::clone(&storage));
        let guard = DeleteOnDrop::new(path.clone(), queue.clone());
        assert_eq!(guard.disarm(), path);
        queue.flush().await;
        assert!(path.exists());
    }
}

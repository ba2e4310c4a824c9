//! Deferred deletion of staged downloads.
//!
//! Handlers hand paths to a [`CleanupScheduler`]; a single background task
//! owns a timer queue and removes each file once its delay expires. The task
//! is independent of the request that scheduled the deletion, so the
//! response body can keep streaming while the timer runs.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct CleanupJob {
    path: PathBuf,
    delay: Duration,
}

/// Cheap, cloneable handle to the cleanup task.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    jobs: mpsc::UnboundedSender<CleanupJob>,
}

impl CleanupScheduler {
    /// Spawns the cleanup task on the current tokio runtime.
    ///
    /// The task runs until every handle is dropped. At that point files that
    /// are still waiting are removed right away and the task exits.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_cleanup_loop(receiver));
        (Self { jobs }, handle)
    }

    /// Fire-and-forget: `path` is deleted after `delay`. There is no way to
    /// cancel a scheduled deletion.
    pub fn schedule_delete(&self, path: impl Into<PathBuf>, delay: Duration) {
        let path = path.into();
        debug!(path = %path.display(), delay_secs = delay.as_secs(), "scheduling cleanup");
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(CleanupJob { path, delay }) {
            // Only happens while the runtime is shutting down.
            warn!(path = %job.path.display(), "cleanup task gone; removing immediately");
            remove_logged(&job.path);
        }
    }
}

async fn run_cleanup_loop(mut jobs: mpsc::UnboundedReceiver<CleanupJob>) {
    let mut queue: DelayQueue<PathBuf> = DelayQueue::new();
    // Queue entries per path, needed to flush on shutdown. The same path can
    // be scheduled more than once when two downloads share a title.
    let mut pending: HashMap<PathBuf, usize> = HashMap::new();

    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => {
                    *pending.entry(job.path.clone()).or_default() += 1;
                    queue.insert(job.path, job.delay);
                }
                None => break,
            },
            Some(expired) = std::future::poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                let path = expired.into_inner();
                if let Some(count) = pending.get_mut(&path) {
                    *count -= 1;
                    if *count == 0 {
                        pending.remove(&path);
                    }
                }
                remove_logged(&path);
            }
        }
    }

    if !pending.is_empty() {
        info!(count = pending.len(), "flushing pending cleanups on shutdown");
    }
    for path in pending.keys() {
        remove_logged(path);
    }
}

fn remove_logged(path: &Path) {
    match remove_staged(path) {
        Ok(true) => info!(path = %path.display(), "cleaned up file"),
        Ok(false) => debug!(path = %path.display(), "file already gone"),
        Err(err) => warn!(path = %path.display(), error = %err, "error cleaning up file"),
    }
}

/// Deletes `path`, treating a missing file as success. Returns whether a file
/// was actually removed.
pub fn remove_staged(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

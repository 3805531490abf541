//! Upload queue
//!
//! A bounded FIFO of [`UploadTask`]s drained by exactly one
//! [`UploadConsumer`]. The consumer is the only place a transfer is started,
//! so no two uploads ever run at the same time.
//!
//! ## Backpressure
//!
//! [`UploadQueue::enqueue`] waits for a free slot when the buffer is full.
//! Producers (debounce timers) stall rather than dropping events. A warning
//! is logged once the buffer is 80% full.
//!
//! ## Shutdown
//!
//! [`UploadQueue::stop`] refuses further tasks. The consumer finishes every
//! task that was already buffered, including its retries, before
//! [`UploadConsumer::run`] returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sftpsync_core::config::Profile;
use sftpsync_core::domain::{absolutize, relative_to_context};
use sftpsync_core::ports::ITransferExecutor;
use sftpsync_core::registry::{ProfileMap, ProfileRegistry};
use tokio::sync::{mpsc, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::syncignore::IgnoreRules;
use crate::SyncError;

/// Number of tasks the queue buffers before `enqueue` blocks
pub const QUEUE_CAPACITY: usize = 100;

/// Fill level (percent) at which `enqueue` logs a capacity warning
pub const WARN_FILL_PERCENT: usize = 80;

/// Upload attempts per task before giving up
pub const MAX_ATTEMPTS: u32 = 3;

/// Wait before attempt `n + 1` after attempt `n` failed
///
/// No wait follows the final attempt, so with three attempts only the first
/// two entries are used.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// One debounced file change waiting to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub profile: String,
    pub path: PathBuf,
}

impl UploadTask {
    pub fn new(profile: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            profile: profile.into(),
            path: path.into(),
        }
    }
}

/// Destination for debounced upload tasks
///
/// The directory watcher only knows this trait, which keeps it testable
/// without a consumer running.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn submit(&self, task: UploadTask) -> Result<(), SyncError>;
}

/// Receives the final outcome of each uploaded task
///
/// Tasks that are dropped (unknown profile, outside context, ignored) never
/// reach the observer.
#[async_trait]
pub trait UploadObserver: Send + Sync {
    async fn on_success(&self, profile: &str, relative: &Path);

    async fn on_failure(&self, profile: &str, relative: &Path, error: &anyhow::Error, attempts: u32);
}

/// Producer handle for the upload queue
///
/// Cheap to clone. All clones feed the same consumer.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::Sender<UploadTask>,
    stop: CancellationToken,
    profiles: ProfileRegistry,
}

impl UploadQueue {
    /// Creates a queue with the default capacity and its consumer
    pub fn new(profiles: ProfileRegistry) -> (Self, UploadConsumer) {
        Self::with_capacity(profiles, QUEUE_CAPACITY)
    }

    pub fn with_capacity(profiles: ProfileRegistry, capacity: usize) -> (Self, UploadConsumer) {
        let (tx, rx) = mpsc::channel(capacity);
        let stop = CancellationToken::new();
        let queue = Self {
            tx,
            stop: stop.clone(),
            profiles: profiles.clone(),
        };
        let consumer = UploadConsumer {
            rx,
            stop,
            draining: false,
            profiles,
        };
        (queue, consumer)
    }

    /// Appends a task, waiting for space if the queue is full
    ///
    /// # Errors
    /// Returns [`SyncError::QueueClosed`] once [`stop`](Self::stop) has been
    /// called, including for callers that were blocked waiting for space.
    pub async fn enqueue(&self, task: UploadTask) -> Result<(), SyncError> {
        if self.stop.is_cancelled() {
            return Err(SyncError::QueueClosed);
        }

        let len = self.len();
        let capacity = self.capacity();
        if len * 100 >= capacity * WARN_FILL_PERCENT {
            warn!(
                len,
                capacity,
                percent = len * 100 / capacity,
                "Upload queue is filling up"
            );
        }

        debug!(profile = %task.profile, path = %task.path.display(), "Enqueueing upload");
        self.tx.send(task).await.map_err(|_| SyncError::QueueClosed)
    }

    /// Number of buffered tasks
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Stops accepting tasks; the consumer drains what is buffered and exits
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!(pending = self.len(), "Stopping upload queue");
            self.stop.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// The registry the consumer resolves profiles from
    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Exclusive access to the profile registry
    ///
    /// The consumer cannot resolve a task while the guard is held. Drop it
    /// before any I/O.
    pub async fn lock_profiles(&self) -> RwLockWriteGuard<'_, ProfileMap> {
        self.profiles.lock().await
    }
}

#[async_trait]
impl UploadSink for UploadQueue {
    async fn submit(&self, task: UploadTask) -> Result<(), SyncError> {
        self.enqueue(task).await
    }
}

/// What happened to a dequeued task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Uploaded { relative: PathBuf, attempts: u32 },
    Failed { relative: PathBuf, attempts: u32 },
    Ignored { relative: PathBuf },
    OutsideContext,
    UnknownProfile,
}

/// A transfer that failed on every attempt
#[derive(Debug)]
pub struct UploadFailure {
    pub error: anyhow::Error,
    pub attempts: u32,
}

/// The single consumer of an [`UploadQueue`]
pub struct UploadConsumer {
    rx: mpsc::Receiver<UploadTask>,
    stop: CancellationToken,
    draining: bool,
    profiles: ProfileRegistry,
}

impl UploadConsumer {
    /// Processes tasks one at a time until the queue is stopped and drained
    pub async fn run(mut self, executor: Arc<dyn ITransferExecutor>, observer: Arc<dyn UploadObserver>) {
        info!("Upload consumer started");
        let mut processed = 0u64;

        while let Some(task) = self.next_task().await {
            self.process(&task, executor.as_ref(), observer.as_ref())
                .await;
            processed += 1;
        }

        info!(processed, "Upload consumer stopped");
    }

    async fn next_task(&mut self) -> Option<UploadTask> {
        if !self.draining {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    // Refuse new sends but keep what is already buffered
                    self.rx.close();
                    self.draining = true;
                }
                task = self.rx.recv() => return task,
            }
        }
        self.rx.recv().await
    }

    /// Runs one task through lookup, containment, ignore and retry
    pub async fn process(
        &self,
        task: &UploadTask,
        executor: &dyn ITransferExecutor,
        observer: &dyn UploadObserver,
    ) -> TaskOutcome {
        let Some(profile) = self.profiles.get(&task.profile).await else {
            warn!(profile = %task.profile, "Dropping upload for unknown profile");
            return TaskOutcome::UnknownProfile;
        };

        let Some((file, context, relative)) = resolve_paths(&profile, &task.path) else {
            return TaskOutcome::OutsideContext;
        };

        let rules = IgnoreRules::load(&context).unwrap_or_else(|e| {
            warn!(context = %context.display(), error = %e, "Failed to load .syncignore, not filtering");
            IgnoreRules::empty()
        });
        if rules.is_ignored(&relative) {
            info!(profile = %task.profile, path = %relative.display(), "Ignored (matched .syncignore)");
            return TaskOutcome::Ignored { relative };
        }

        match upload_with_retry(executor, &profile, &file, &relative).await {
            Ok(attempts) => {
                info!(profile = %task.profile, path = %relative.display(), attempts, "Uploaded");
                observer.on_success(&task.profile, &relative).await;
                TaskOutcome::Uploaded { relative, attempts }
            }
            Err(failure) => {
                error!(
                    profile = %task.profile,
                    path = %relative.display(),
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Upload failed"
                );
                observer
                    .on_failure(&task.profile, &relative, &failure.error, failure.attempts)
                    .await;
                TaskOutcome::Failed {
                    relative,
                    attempts: failure.attempts,
                }
            }
        }
    }
}

/// Resolves (absolute file, absolute context, relative path)
///
/// Both sides are canonicalized when they exist so a symlinked temp or home
/// directory does not defeat the containment check.
fn resolve_paths(profile: &Profile, file: &Path) -> Option<(PathBuf, PathBuf, PathBuf)> {
    let Some(context) = profile.context_path() else {
        error!(path = %file.display(), "Profile has no context, dropping upload");
        return None;
    };

    let resolve = |p: &Path| std::fs::canonicalize(p).or_else(|_| absolutize(p).map_err(|e| e.to_string()));
    let (file, context) = match (resolve(file), resolve(&context)) {
        (Ok(f), Ok(c)) => (f, c),
        (Err(e), _) | (_, Err(e)) => {
            error!(path = %file.display(), error = %e, "Cannot resolve upload path");
            return None;
        }
    };

    match relative_to_context(&file, &context) {
        Ok(relative) => Some((file, context, relative)),
        Err(e) => {
            error!(error = %e, "Dropping upload outside its context");
            None
        }
    }
}

/// Attempts an upload up to [`MAX_ATTEMPTS`] times
///
/// Returns the number of attempts it took on success. Every failure is
/// retried; the transfer tool's errors are not reliably classifiable.
pub async fn upload_with_retry(
    executor: &dyn ITransferExecutor,
    profile: &Profile,
    file: &Path,
    relative: &Path,
) -> Result<u32, UploadFailure> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        match executor.upload_file(profile, file).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(path = %relative.display(), attempt, "Upload succeeded after retry");
                }
                return Ok(attempt);
            }
            Err(error) if attempt < MAX_ATTEMPTS => {
                let delay = RETRY_DELAYS[(attempt - 1) as usize];
                warn!(
                    path = %relative.display(),
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return Err(UploadFailure {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

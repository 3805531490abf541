//! sftp-sync Sync - Event-to-upload pipeline
//!
//! Provides:
//! - Recursive directory watching with on-the-fly subscription of new directories
//! - Per-file debouncing of change events
//! - A bounded, strictly serial upload queue with retry
//! - Batched/backed-off user notifications
//! - Live reconciliation of watched profiles on config file changes
//!
//! ## Flow
//!
//! ```text
//! notify ──→ DirectoryWatcher ──→ Debouncer ──→ UploadQueue ──→ UploadConsumer ──→ ITransferExecutor
//!                  ▲                                                  │
//!           ConfigReconciler                                     Notifier ──→ INotificationService
//! ```
//!
//! ## Modules
//!
//! - [`debouncer`] - Per-key cancellable timers
//! - [`watcher`] - Directory subscriptions, event classification, profile matching
//! - [`queue`] - Bounded upload queue and its single consumer
//! - [`notifier`] - Success batching and failure backoff
//! - [`reconciler`] - Config file watch and profile diffing
//! - [`syncignore`] - `.syncignore` loading and matching

pub mod debouncer;
pub mod notifier;
pub mod queue;
pub mod reconciler;
pub mod syncignore;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

pub use debouncer::Debouncer;
pub use notifier::Notifier;
pub use queue::{UploadConsumer, UploadObserver, UploadQueue, UploadSink, UploadTask};
pub use reconciler::{ConfigFileWatcher, ConfigReconciler, ReconcileReport};
pub use syncignore::IgnoreRules;
pub use watcher::DirectoryWatcher;

/// Errors that can occur in the sync pipeline
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The profile has no context directory configured
    #[error("profile '{0}' has no context set")]
    MissingContext(String),

    /// The context directory does not exist or is not a directory
    #[error("context directory doesn't exist: {}", .0.display())]
    ContextNotFound(PathBuf),

    /// A second registration was attempted for the same profile
    #[error("profile already watched: {0}")]
    AlreadyWatched(String),

    /// Unwatch/update of a profile that has no registration
    #[error("profile not watched: {0}")]
    NotWatched(String),

    /// The OS watch subsystem could not be initialised
    #[error("failed to create file watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    /// Subscribing a directory failed (e.g. inotify watch limit reached)
    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The upload queue was stopped and accepts no new tasks
    #[error("upload queue is closed")]
    QueueClosed,

    /// The `.syncignore` file exists but could not be read
    #[error("failed to read {}: {source}", .path.display())]
    IgnoreFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A domain-level error propagated from sftpsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] sftpsync_core::domain::errors::DomainError),
}

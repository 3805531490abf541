//! sftp-sync lftp - Transfer executor backed by the `lftp` command
//!
//! Provides:
//! - [`LftpExecutor`], the [`ITransferExecutor`] used by the daemon
//! - lftp command-line construction for password and SSH key logins
//! - Classification of lftp's output into short, user-facing reasons
//!
//! ## Modules
//!
//! - [`command`] - Argument building, quoting and error classification
//! - [`executor`] - Process spawning and the port implementation
//!
//! [`ITransferExecutor`]: sftpsync_core::ports::ITransferExecutor

pub mod command;
pub mod executor;

use std::path::PathBuf;

use thiserror::Error;

pub use executor::LftpExecutor;

/// Errors that can occur when running lftp
#[derive(Debug, Error)]
pub enum LftpError {
    /// The lftp binary could not be started
    #[error("failed to run {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// lftp ran and reported a failure; holds the classified reason
    #[error("upload failed: {0}")]
    Failed(String),

    /// The profile cannot be used for a single-file upload
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

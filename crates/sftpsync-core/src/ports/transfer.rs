//! Transfer executor port (driven/secondary port)
//!
//! The pipeline never speaks a wire protocol itself. Once a file has been
//! debounced, filtered and dequeued, it is handed to an [`ITransferExecutor`]
//! which pushes that single file to the profile's remote.

use std::path::Path;

use crate::config::Profile;

/// Port trait for pushing a local file to a profile's remote target
///
/// ## Implementation Notes
///
/// - `path` is absolute and guaranteed to lie under the profile's context.
/// - The remote location is derived from the path relative to the context,
///   re-rooted at `profile.remote_path`.
/// - An attempt runs to completion or failure; callers never cancel it.
#[async_trait::async_trait]
pub trait ITransferExecutor: Send + Sync {
    /// Uploads one file
    ///
    /// # Errors
    /// Returns a human-readable reason when the transfer fails. The caller
    /// decides whether to retry.
    async fn upload_file(&self, profile: &Profile, path: &Path) -> anyhow::Result<()>;
}

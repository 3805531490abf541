//! LftpExecutor - ITransferExecutor implementation that shells out to lftp
//!
//! ## Design Notes
//!
//! - One lftp process per file. The upload queue is strictly serial, so at
//!   most one process runs at a time.
//! - stdout and stderr are both inspected for the failure reason; lftp is
//!   not consistent about which one it writes to.
//! - A running process is never killed. An attempt runs to completion.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use sftpsync_core::config::Profile;
use sftpsync_core::domain::{absolutize, relative_to_context};
use sftpsync_core::ports::ITransferExecutor;
use tokio::process::Command;
use tracing::debug;

use crate::command::{build_args, parse_error, put_command};
use crate::LftpError;

/// Default program name, resolved through `PATH`
pub const LFTP_PROGRAM: &str = "lftp";

/// Uploads single files with `lftp put`
#[derive(Debug, Clone)]
pub struct LftpExecutor {
    program: PathBuf,
}

impl Default for LftpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LftpExecutor {
    pub fn new() -> Self {
        Self::with_program(LFTP_PROGRAM)
    }

    /// Uses `program` instead of `lftp` from `PATH`
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs lftp with `args` and maps a non-zero exit to a classified error
    async fn run(&self, args: &[String]) -> Result<(), LftpError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| LftpError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!(status = ?output.status, output = %combined.trim(), "lftp exited with failure");
        Err(LftpError::Failed(parse_error(&combined)))
    }
}

/// Resolves `file`'s path relative to the profile's context
fn relative_path(profile: &Profile, file: &Path) -> Result<PathBuf, LftpError> {
    let context = profile
        .context_path()
        .ok_or_else(|| LftpError::InvalidProfile("no context set".to_string()))?;
    let context = std::fs::canonicalize(&context)
        .or_else(|_| absolutize(&context))
        .map_err(|e| LftpError::InvalidProfile(e.to_string()))?;
    let file = std::fs::canonicalize(file)
        .or_else(|_| absolutize(file))
        .map_err(|e| LftpError::InvalidProfile(e.to_string()))?;
    relative_to_context(&file, &context).map_err(|e| LftpError::InvalidProfile(e.to_string()))
}

#[async_trait]
impl ITransferExecutor for LftpExecutor {
    async fn upload_file(&self, profile: &Profile, path: &Path) -> Result<()> {
        let relative = relative_path(profile, path)?;
        let command = put_command(&profile.remote_path, &relative, path);
        let args = build_args(profile, &command);

        debug!(
            host = %profile.host,
            path = %relative.display(),
            "Uploading with lftp"
        );
        self.run(&args).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;

    /// Writes an executable stand-in for lftp that prints `output` and exits
    /// with `code`, recording its arguments to `args.txt`
    fn fake_lftp(dir: &Path, output: &str, code: i32) -> PathBuf {
        let script = dir.join("fake-lftp");
        let body = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > \"{}\"\necho '{}' >&2\nexit {}\n",
            dir.join("args.txt").display(),
            output,
            code
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn site(dir: &Path) -> (Profile, PathBuf) {
        let context = dir.join("site");
        std::fs::create_dir_all(context.join("css")).unwrap();
        let file = context.join("css/site.css");
        std::fs::write(&file, "body{}").unwrap();
        let profile = Profile::new("ftp.example.com", "deploy", context.to_string_lossy())
            .with_password("pw")
            .with_remote_path("/www");
        (profile, file)
    }

    #[tokio::test]
    async fn test_successful_upload_passes_put_command() {
        let dir = TempDir::new().unwrap();
        let (profile, file) = site(dir.path());
        let executor = LftpExecutor::with_program(fake_lftp(dir.path(), "", 0));

        executor.upload_file(&profile, &file).await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert!(args.contains("put -O \"/www/css\""));
        assert!(args.contains("deploy,pw"));
        assert!(args.ends_with("ftp://ftp.example.com\n"));
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let dir = TempDir::new().unwrap();
        let (profile, file) = site(dir.path());
        let executor = LftpExecutor::with_program(fake_lftp(
            dir.path(),
            "mirror: Login failed: 530 Login incorrect.",
            1,
        ));

        let err = executor.upload_file(&profile, &file).await.unwrap_err();
        assert_eq!(err.to_string(), "upload failed: Authentication failed");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let (profile, file) = site(dir.path());
        let executor = LftpExecutor::with_program(dir.path().join("no-such-lftp"));

        let err = executor.upload_file(&profile, &file).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LftpError>(),
            Some(LftpError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_outside_context_rejected() {
        let dir = TempDir::new().unwrap();
        let (profile, _) = site(dir.path());
        let stray = dir.path().join("stray.txt");
        std::fs::write(&stray, "x").unwrap();
        let executor = LftpExecutor::with_program(fake_lftp(dir.path(), "", 0));

        let err = executor.upload_file(&profile, &stray).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LftpError>(),
            Some(LftpError::InvalidProfile(_))
        ));
        assert!(!dir.path().join("args.txt").exists());
    }
}

//! sftp-sync Daemon - Automatic upload of local changes
//!
//! This binary runs in the foreground (typically as a systemd user service)
//! and handles:
//! - Watching the context directory of every `autoSync` profile
//! - Debounced, serial uploads through lftp
//! - Desktop notifications for upload outcomes
//! - Live reload when the configuration file changes
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires the sync pipeline together, performs an initial
//! reconcile of the configuration and then waits for a `CancellationToken`
//! triggered on receipt of SIGTERM or SIGINT. On shutdown the upload queue
//! is drained before the process exits.

mod deps;
mod desktop;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use sftpsync_core::config::Config;
use sftpsync_core::ports::{INotificationService, ITransferExecutor};
use sftpsync_core::registry::ProfileRegistry;
use sftpsync_lftp::LftpExecutor;
use sftpsync_sync::{
    ConfigFileWatcher, ConfigReconciler, DirectoryWatcher, Notifier, UploadQueue, UploadSink,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::desktop::NotifySendService;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "sftpsyncd", version, about = "Upload local changes to sftp-sync profiles")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Start even if lftp or notify-send is not on PATH
    #[arg(long)]
    skip_dependency_check: bool,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

/// Log level used when `RUST_LOG` is not set
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the pipeline for the lifetime of the process
struct DaemonService {
    /// Configuration file watched for live reloads
    config_path: PathBuf,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config_path: PathBuf, shutdown: CancellationToken) -> Self {
        Self {
            config_path,
            shutdown,
        }
    }

    /// Runs the daemon until shutdown
    ///
    /// 1. Loads and validates the configuration
    /// 2. Builds the watcher, queue, notifier and reconciler
    /// 3. Watches every auto-sync profile (fatal if none can be watched)
    /// 4. Spawns the event loop, the upload consumer and the config watcher
    /// 5. On shutdown, cancels pending timers and drains the queue
    async fn run(&self) -> Result<()> {
        let mut config = Config::load(&self.config_path).with_context(|| {
            format!(
                "Failed to load configuration from {}",
                self.config_path.display()
            )
        })?;
        info!(config_path = %self.config_path.display(), profiles = config.profiles.len(), "Loaded configuration");
        for rejected in config.retain_valid() {
            warn!(error = %rejected, "Ignoring invalid profile");
        }

        let registry = ProfileRegistry::new();
        let (watcher, events) =
            DirectoryWatcher::new().context("Failed to initialise file watcher")?;
        let (queue, consumer) = UploadQueue::new(registry.clone());

        let notifications: Arc<dyn INotificationService> = Arc::new(NotifySendService::new());
        let notifier = Arc::new(Notifier::new(notifications));
        let executor: Arc<dyn ITransferExecutor> = Arc::new(LftpExecutor::new());
        let sink: Arc<dyn UploadSink> = Arc::new(queue.clone());

        let reconciler = ConfigReconciler::new(
            self.config_path.clone(),
            watcher.clone(),
            registry.clone(),
            sink,
        );
        let report = reconciler.reconcile(&config).await;
        let watched = registry.len().await;
        if watched == 0 {
            bail!(
                "no profiles with autoSync enabled could be watched ({} failed, {} skipped)",
                report.failed.len(),
                report.skipped.len()
            );
        }

        let consumer_task = tokio::spawn(consumer.run(executor, notifier));
        let watcher_task = tokio::spawn(watcher.clone().run(events, self.shutdown.clone()));
        let config_task = match ConfigFileWatcher::new(&self.config_path) {
            Ok(changes) => Some(tokio::spawn(
                reconciler.run(changes, self.shutdown.clone()),
            )),
            Err(e) => {
                warn!(error = %e, "Failed to watch config file, live reload disabled");
                None
            }
        };

        info!(profiles = watched, "Daemon started");
        self.shutdown.cancelled().await;

        info!("Daemon stopping");
        if let Some(task) = config_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Config watcher task failed");
            }
        }
        if let Err(e) = watcher_task.await {
            warn!(error = %e, "Watcher task failed");
        }

        let cancelled = watcher.debouncer().stop_all();
        info!(cancelled, pending = queue.len(), "Draining upload queue");
        queue.stop();
        consumer_task
            .await
            .context("Upload consumer terminated abnormally")?;
        watcher.close();

        Ok(())
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGINT or SIGTERM and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!("sftp-sync daemon starting (sftpsyncd)");

    if !cli.skip_dependency_check {
        deps::check_required(deps::REQUIRED_COMMANDS)?;
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(cli.config_path(), shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(()) => info!("sftp-sync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "sftp-sync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["sftpsyncd"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.skip_dependency_check);
        assert_eq!(cli.config_path(), Config::default_path());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "sftpsyncd",
            "-vv",
            "--config",
            "/tmp/sftp-sync.json",
            "--skip-dependency-check",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.skip_dependency_check);
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/sftp-sync.json"));
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(default_filter(0), "info");
        assert_eq!(default_filter(1), "debug");
        assert_eq!(default_filter(5), "trace");
    }

    #[tokio::test]
    async fn test_missing_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(dir.path().join("config.json"), CancellationToken::new());

        let err = service.run().await.unwrap_err();
        assert!(format!("{err:#}").contains("config file not found"));
    }

    #[tokio::test]
    async fn test_no_watchable_profiles_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"site": {"host": "h", "username": "u", "password": "p",
                         "context": "/nonexistent/sftp-sync-test", "autoSync": true},
                "manual": {"host": "h", "username": "u", "password": "p"}}"#,
        )
        .unwrap();
        let service = DaemonService::new(config_path, CancellationToken::new());

        let err = tokio::time::timeout(Duration::from_secs(5), service.run())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("no profiles with autoSync enabled"));
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let context = dir.path().join("site");
        std::fs::create_dir(&context).unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            format!(
                r#"{{"site": {{"host": "h", "username": "u", "password": "p",
                              "context": "{}", "autoSync": true}}}}"#,
                context.display()
            ),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let service = DaemonService::new(config_path, shutdown.clone());
        let handle = tokio::spawn(async move { service.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

//! Live configuration reconciliation
//!
//! [`ConfigFileWatcher`] reports writes to the configuration file.
//! [`ConfigReconciler`] reloads the file and diffs it against the profile
//! registry, starting and stopping directory watches to match:
//!
//! | Change                                  | Action                        |
//! |-----------------------------------------|-------------------------------|
//! | removed, or `autoSync` turned off       | unwatch, drop from registry   |
//! | context changed                         | unwatch, watch new context    |
//! | other fields changed                    | replace snapshot in place     |
//! | new profile with `autoSync` on          | watch (skip if no context)    |
//!
//! Each profile is handled on its own. A failure is logged and recorded in
//! the [`ReconcileReport`]; the remaining profiles are still processed.
//!
//! The daemon's startup is a reconcile against an empty registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use sftpsync_core::config::{Config, ConfigError, Profile};
use sftpsync_core::domain::absolutize;
use sftpsync_core::registry::ProfileRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::UploadSink;
use crate::watcher::{classify, DirectoryWatcher, FsEventKind};
use crate::SyncError;

/// What a reconcile pass did, per profile name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
    pub refreshed: Vec<String>,
    /// Profiles whose transition failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Auto-sync profiles without a context
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.restarted.is_empty()
            && self.refreshed.is_empty()
            && self.failed.is_empty()
            && self.skipped.is_empty()
    }
}

/// Keeps watches and the profile registry in line with the config file
pub struct ConfigReconciler {
    config_path: PathBuf,
    watcher: DirectoryWatcher,
    registry: ProfileRegistry,
    sink: Arc<dyn UploadSink>,
}

impl ConfigReconciler {
    pub fn new(
        config_path: impl Into<PathBuf>,
        watcher: DirectoryWatcher,
        registry: ProfileRegistry,
        sink: Arc<dyn UploadSink>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            watcher,
            registry,
            sink,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Loads and validates the config file, then reconciles against it
    ///
    /// Invalid profiles are dropped with a warning and treated as removed.
    ///
    /// # Errors
    /// Returns the load error if the file cannot be read or parsed; nothing
    /// is changed in that case.
    pub async fn reload(&self) -> Result<ReconcileReport, ConfigError> {
        let mut config = Config::load(&self.config_path)?;
        for rejected in config.retain_valid() {
            warn!(error = %rejected, "Ignoring invalid profile");
        }
        Ok(self.reconcile(&config).await)
    }

    /// Applies the difference between the registry and `config`
    pub async fn reconcile(&self, config: &Config) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut previous: Vec<(String, Arc<Profile>)> =
            self.registry.snapshot().await.into_iter().collect();
        previous.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, old) in &previous {
            match config.get(name).filter(|p| p.auto_sync) {
                None => self.stop(name, &mut report).await,
                Some(new) if new == old.as_ref() => {}
                Some(new) if new.context_path() != old.context_path() => {
                    self.restart(name, new, &mut report).await
                }
                Some(new) => self.refresh(name, new, &mut report).await,
            }
        }

        for (name, profile) in config.auto_sync_profiles() {
            if previous.iter().any(|(n, _)| n == name) {
                continue;
            }
            self.start(name, profile, &mut report).await;
        }

        if !report.is_noop() {
            info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                restarted = report.restarted.len(),
                refreshed = report.refreshed.len(),
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "Reconciled profiles"
            );
        }
        report
    }

    async fn stop(&self, name: &str, report: &mut ReconcileReport) {
        // Timers go before the registry entry so nothing new gets queued
        if let Err(e) = self.watcher.unwatch(name) {
            warn!(profile = name, error = %e, "Unwatch failed");
        }
        self.registry.remove(name).await;
        info!(profile = name, "Auto-sync stopped");
        report.stopped.push(name.to_string());
    }

    async fn restart(&self, name: &str, profile: &Profile, report: &mut ReconcileReport) {
        if let Err(e) = self.watcher.unwatch(name) {
            warn!(profile = name, error = %e, "Unwatch failed");
        }

        let profile = Arc::new(profile.clone());
        match self.watcher.watch(name, Arc::clone(&profile), Arc::clone(&self.sink)) {
            Ok(_) => {
                info!(profile = name, context = %profile.context, "Context changed, watch restarted");
                self.registry.insert(name, profile).await;
                report.restarted.push(name.to_string());
            }
            Err(e) => {
                self.registry.remove(name).await;
                error!(profile = name, error = %e, "Failed to watch new context");
                report.failed.push((name.to_string(), e.to_string()));
            }
        }
    }

    async fn refresh(&self, name: &str, profile: &Profile, report: &mut ReconcileReport) {
        let profile = Arc::new(profile.clone());
        match self.watcher.update_profile(name, Arc::clone(&profile)) {
            Ok(()) => {
                self.registry.insert(name, profile).await;
                debug!(profile = name, "Profile settings refreshed");
                report.refreshed.push(name.to_string());
            }
            // Registry and watcher disagree; rebuild the registration
            Err(SyncError::NotWatched(_)) => self.restart(name, &profile, report).await,
            Err(e) => {
                error!(profile = name, error = %e, "Failed to refresh profile");
                report.failed.push((name.to_string(), e.to_string()));
            }
        }
    }

    async fn start(&self, name: &str, profile: &Profile, report: &mut ReconcileReport) {
        if profile.context_path().is_none() {
            warn!(profile = name, "Auto-sync enabled but no context set, skipping");
            report.skipped.push(name.to_string());
            return;
        }

        let profile = Arc::new(profile.clone());
        match self.watcher.watch(name, Arc::clone(&profile), Arc::clone(&self.sink)) {
            Ok(directories) => {
                self.registry.insert(name, profile).await;
                info!(profile = name, directories, "Auto-sync started");
                report.started.push(name.to_string());
            }
            Err(e) => {
                warn!(profile = name, error = %e, "Failed to start auto-sync");
                report.failed.push((name.to_string(), e.to_string()));
            }
        }
    }

    /// Reloads on every config file change until `shutdown` fires
    ///
    /// A failed reload keeps the current profiles.
    pub async fn run(self, mut changes: ConfigFileWatcher, shutdown: CancellationToken) {
        info!(path = %self.config_path.display(), "Watching configuration file");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_none() {
                        warn!("Config watcher channel closed");
                        break;
                    }
                    info!("Configuration changed, reloading");
                    if let Err(e) = self.reload().await {
                        warn!(error = %e, "Failed to reload configuration, keeping current profiles");
                    }
                }
            }
        }

        info!("Configuration watcher stopped");
    }
}

/// Signals writes to a single configuration file
///
/// Watches the file's parent directory so that editors which replace the
/// file (write to a temp file, then rename) are still seen.
pub struct ConfigFileWatcher {
    _watcher: Option<RecommendedWatcher>,
    rx: mpsc::Receiver<()>,
}

impl ConfigFileWatcher {
    pub fn new(path: &Path) -> Result<Self, SyncError> {
        let path = absolutize(path)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| SyncError::ContextNotFound(path.clone()))?;

        // One slot: a burst of writes collapses into one pending reload
        let (tx, rx) = mpsc::channel(1);
        let target = path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let hit = classify(&event).iter().any(|e| {
                        e.path == target
                            && matches!(e.kind, FsEventKind::Write | FsEventKind::Create)
                    });
                    if hit {
                        let _ = tx.try_send(());
                    }
                }
                Err(err) => error!(error = %err, "Config watcher error"),
            },
            notify::Config::default(),
        )
        .map_err(SyncError::WatcherInit)?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|source| SyncError::Watch {
                path: parent.clone(),
                source,
            })?;

        debug!(path = %path.display(), "Config file watch established");
        Ok(Self {
            _watcher: Some(watcher),
            rx,
        })
    }

    /// A change source fed by hand instead of the OS
    pub fn from_channel(rx: mpsc::Receiver<()>) -> Self {
        Self { _watcher: None, rx }
    }

    /// Waits for the next change; `None` once the source is gone
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

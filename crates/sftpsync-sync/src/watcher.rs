//! Directory watching and profile dispatch
//!
//! Provides a [`DirectoryWatcher`] that subscribes every directory under each
//! watched profile's context, classifies raw `notify` events and schedules a
//! debounced upload for every file that is created or written.
//!
//! ## Architecture
//!
//! ```text
//! inotify
//!    │
//!    ▼
//! RecommendedWatcher ──→ mpsc::channel<FsEvent> ──→ DirectoryWatcher::run
//!                                                       │
//!                             find_matching_profiles ◄──┤
//!                                                       ▼
//!                                      Debouncer<(profile, path)> ──→ UploadSink
//! ```
//!
//! ## Subscriptions
//!
//! `notify` is used non-recursively: each directory is subscribed on its own
//! so that symlinked directories can be skipped and overlapping contexts can
//! share subscriptions. A directory → owning profiles map counts references;
//! a directory is unsubscribed only when its last owner is unwatched.
//!
//! Directories created after `watch` are subscribed as their `create` event
//! arrives.
//!
//! ## Event handling
//!
//! Only `create` and `write` events schedule uploads. Deletes and renames away
//! from a path are not propagated to the remote; they only release the
//! subscriptions of directories that disappeared. The event loop only
//! classifies and schedules, so a slow transfer never stalls event intake.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sftpsync_core::config::Profile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

use crate::debouncer::Debouncer;
use crate::queue::{UploadSink, UploadTask};
use crate::SyncError;

/// Buffer between the OS watcher thread and the event loop
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// Events
// ============================================================================

/// The event kinds the pipeline distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Write,
    /// Deleted, or renamed away
    Remove,
    Other,
}

/// A classified filesystem event for a single path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

impl FsEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Receiving half of the watcher's event channel
pub type RawEventReceiver = mpsc::Receiver<FsEvent>;

/// Maps a raw `notify` event onto one [`FsEvent`] per affected path
///
/// A rename *into* a watched directory counts as a create, which is how
/// editors that save via a temp file and rename are picked up.
pub fn classify(event: &notify::Event) -> Vec<FsEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FsEventKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Create,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            FsEventKind::Remove
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            FsEventKind::Write
        }
        _ => FsEventKind::Other,
    };

    event
        .paths
        .iter()
        .map(|p| FsEvent::new(p.clone(), kind))
        .collect()
}

// ============================================================================
// Backend
// ============================================================================

/// Per-directory subscription primitive
///
/// Implemented for `notify`'s recommended watcher. Tests substitute a
/// recorder.
pub trait WatchBackend: Send {
    fn subscribe(&mut self, dir: &Path) -> notify::Result<()>;
    fn unsubscribe(&mut self, dir: &Path) -> notify::Result<()>;
}

impl WatchBackend for RecommendedWatcher {
    fn subscribe(&mut self, dir: &Path) -> notify::Result<()> {
        self.watch(dir, RecursiveMode::NonRecursive)
    }

    fn unsubscribe(&mut self, dir: &Path) -> notify::Result<()> {
        self.unwatch(dir)
    }
}

// ============================================================================
// State
// ============================================================================

/// Debounce key: one pending upload per (profile, file)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub profile: String,
    pub path: PathBuf,
}

struct Registration {
    profile: Arc<Profile>,
    /// Canonical context root
    context: PathBuf,
    dirs: BTreeSet<PathBuf>,
    sink: Arc<dyn UploadSink>,
}

struct WatchState {
    backend: Box<dyn WatchBackend>,
    registrations: HashMap<String, Registration>,
    /// Subscribed directory → profiles that own it
    subscriptions: HashMap<PathBuf, BTreeSet<String>>,
}

impl WatchState {
    /// Adds `owner` to `dir`, subscribing it if it has no owner yet
    ///
    /// With `force`, an already-subscribed directory is subscribed again;
    /// a directory recreated at the same path needs a fresh OS watch.
    fn acquire(&mut self, owner: &str, dir: &Path, force: bool) -> Result<(), SyncError> {
        let is_new = !self.subscriptions.contains_key(dir);
        if is_new || force {
            self.backend
                .subscribe(dir)
                .map_err(|source| SyncError::Watch {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        self.subscriptions
            .entry(dir.to_path_buf())
            .or_default()
            .insert(owner.to_string());
        Ok(())
    }

    /// Removes `owner` from `dir`, unsubscribing it once no owner is left
    fn release(&mut self, owner: &str, dir: &Path) {
        let Some(owners) = self.subscriptions.get_mut(dir) else {
            return;
        };
        owners.remove(owner);
        if owners.is_empty() {
            self.subscriptions.remove(dir);
            // The directory may already be gone, taking its OS watch with it
            if let Err(e) = self.backend.unsubscribe(dir) {
                debug!(path = %dir.display(), error = %e, "Unsubscribe failed");
            }
        }
    }
}

// ============================================================================
// DirectoryWatcher
// ============================================================================

/// Watches the context trees of all auto-sync profiles
///
/// Cloning yields another handle to the same registrations.
#[derive(Clone)]
pub struct DirectoryWatcher {
    state: Arc<Mutex<WatchState>>,
    debouncer: Debouncer<DebounceKey>,
}

impl DirectoryWatcher {
    /// Creates a watcher backed by the OS notification facility
    ///
    /// # Errors
    /// Returns [`SyncError::WatcherInit`] if inotify cannot be initialised.
    /// This is fatal to the daemon.
    pub fn new() -> Result<(Self, RawEventReceiver), SyncError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for fs_event in classify(&event) {
                        if tx.blocking_send(fs_event).is_err() {
                            // Event loop has shut down
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .map_err(SyncError::WatcherInit)?;

        info!("Directory watcher initialised");
        Ok((Self::with_backend(Box::new(watcher)), rx))
    }

    /// Creates a watcher over an arbitrary subscription backend
    pub fn with_backend(backend: Box<dyn WatchBackend>) -> Self {
        Self {
            state: Arc::new(Mutex::new(WatchState {
                backend,
                registrations: HashMap::new(),
                subscriptions: HashMap::new(),
            })),
            debouncer: Debouncer::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts watching `profile`'s context tree under `name`
    ///
    /// Returns the number of directories subscribed. On error nothing stays
    /// subscribed for this profile.
    pub fn watch(
        &self,
        name: &str,
        profile: Arc<Profile>,
        sink: Arc<dyn UploadSink>,
    ) -> Result<usize, SyncError> {
        let raw = profile
            .context_path()
            .ok_or_else(|| SyncError::MissingContext(name.to_string()))?;
        if !raw.is_dir() {
            return Err(SyncError::ContextNotFound(raw));
        }
        let context = std::fs::canonicalize(&raw)?;
        let dirs = collect_dirs(&context);

        let mut state = self.lock();
        if state.registrations.contains_key(name) {
            return Err(SyncError::AlreadyWatched(name.to_string()));
        }

        let mut subscribed: BTreeSet<PathBuf> = BTreeSet::new();
        for dir in dirs {
            if let Err(e) = state.acquire(name, &dir, false) {
                for done in &subscribed {
                    state.release(name, done);
                }
                return Err(e);
            }
            subscribed.insert(dir);
        }

        let count = subscribed.len();
        info!(
            profile = name,
            context = %context.display(),
            directories = count,
            "Watching context"
        );
        state.registrations.insert(
            name.to_string(),
            Registration {
                profile,
                context,
                dirs: subscribed,
                sink,
            },
        );
        Ok(count)
    }

    /// Stops watching `name` and cancels its pending debounce timers
    ///
    /// Once this returns, no further upload is scheduled for the profile.
    pub fn unwatch(&self, name: &str) -> Result<(), SyncError> {
        {
            let mut state = self.lock();
            let registration = state
                .registrations
                .remove(name)
                .ok_or_else(|| SyncError::NotWatched(name.to_string()))?;
            for dir in &registration.dirs {
                state.release(name, dir);
            }
        }

        let cancelled = self.debouncer.stop_where(|key| key.profile == name);
        info!(profile = name, cancelled, "Stopped watching context");
        Ok(())
    }

    /// Replaces the profile snapshot of an existing registration
    ///
    /// The context must not change; callers re-watch for that.
    pub fn update_profile(&self, name: &str, profile: Arc<Profile>) -> Result<(), SyncError> {
        let mut state = self.lock();
        let registration = state
            .registrations
            .get_mut(name)
            .ok_or_else(|| SyncError::NotWatched(name.to_string()))?;
        registration.profile = profile;
        debug!(profile = name, "Updated watched profile");
        Ok(())
    }

    pub fn is_watching(&self, name: &str) -> bool {
        self.lock().registrations.contains_key(name)
    }

    /// Names of all watched profiles, sorted
    pub fn watched_profiles(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().registrations.keys().cloned().collect();
        names.sort();
        names
    }

    /// The profile snapshot a registration currently uses
    pub fn profile(&self, name: &str) -> Option<Arc<Profile>> {
        self.lock()
            .registrations
            .get(name)
            .map(|r| Arc::clone(&r.profile))
    }

    /// All subscribed directories, sorted
    pub fn subscribed_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<_> = self.lock().subscriptions.keys().cloned().collect();
        dirs.sort();
        dirs
    }

    pub fn debouncer(&self) -> &Debouncer<DebounceKey> {
        &self.debouncer
    }

    /// Acts on one classified event
    ///
    /// Must run inside a tokio runtime; scheduling spawns a timer task.
    pub fn handle_event(&self, event: &FsEvent) {
        if event.kind == FsEventKind::Remove {
            self.forget_directory(&event.path);
            return;
        }
        if !matches!(event.kind, FsEventKind::Create | FsEventKind::Write) {
            trace!(path = %event.path.display(), "Ignoring event");
            return;
        }

        let metadata = match std::fs::symlink_metadata(&event.path) {
            Ok(m) => m,
            Err(_) => {
                trace!(path = %event.path.display(), "Path vanished before handling");
                return;
            }
        };

        if metadata.file_type().is_symlink() {
            debug!(path = %event.path.display(), "Skipping symlink");
            return;
        }

        if metadata.is_dir() {
            if event.kind == FsEventKind::Create {
                self.discover_directory(&event.path);
            }
            return;
        }

        if metadata.is_file() {
            self.schedule_upload(&event.path);
        }
    }

    /// Subscribes a newly created directory tree for every profile whose
    /// context contains it, then schedules the files already inside it
    fn discover_directory(&self, dir: &Path) {
        let dirs = collect_dirs(dir);
        {
            let mut state = self.lock();
            let owners: Vec<String> = state
                .registrations
                .iter()
                .filter(|(_, r)| dir.starts_with(&r.context))
                .map(|(name, _)| name.clone())
                .collect();

            for owner in &owners {
                for sub in &dirs {
                    match state.acquire(owner, sub, true) {
                        Ok(()) => {
                            if let Some(r) = state.registrations.get_mut(owner) {
                                r.dirs.insert(sub.clone());
                            }
                        }
                        Err(e) => {
                            warn!(profile = %owner, error = %e, "Failed to watch new directory");
                        }
                    }
                }
            }

            if owners.is_empty() {
                return;
            }
            debug!(path = %dir.display(), directories = dirs.len(), "Discovered new directory");
        }

        // Files copied in together with the directory produce no events of
        // their own
        for entry in WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            self.schedule_upload(entry.path());
        }
    }

    /// Releases the subscriptions of a removed directory and everything
    /// below it
    ///
    /// A context root stays registered to its profile. Returns the number of
    /// directories released.
    fn forget_directory(&self, dir: &Path) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.subscriptions.keys().any(|d| d.starts_with(dir)) {
            return 0;
        }

        let mut gone = Vec::new();
        for (name, registration) in state.registrations.iter_mut() {
            let stale: Vec<PathBuf> = registration
                .dirs
                .iter()
                .filter(|d| d.starts_with(dir) && **d != registration.context)
                .cloned()
                .collect();
            for d in stale {
                registration.dirs.remove(&d);
                gone.push((name.clone(), d));
            }
        }
        for (owner, d) in &gone {
            state.release(owner, d);
        }

        let released = gone.len();
        if released > 0 {
            debug!(path = %dir.display(), released, "Released removed directory");
        }
        released
    }

    fn schedule_upload(&self, path: &Path) {
        let targets: Vec<(String, std::time::Duration, Arc<dyn UploadSink>)> = {
            let state = self.lock();
            let contexts = state
                .registrations
                .iter()
                .map(|(name, r)| (name.as_str(), r.context.as_path()));
            find_matching_profiles(path, contexts)
                .into_iter()
                .filter_map(|name| {
                    state.registrations.get(&name).map(|r| {
                        (name, r.profile.debounce(), Arc::clone(&r.sink))
                    })
                })
                .collect()
        };

        if targets.is_empty() {
            trace!(path = %path.display(), "No profile owns path");
            return;
        }

        for (profile, delay, sink) in targets {
            let key = DebounceKey {
                profile: profile.clone(),
                path: path.to_path_buf(),
            };
            let task = UploadTask::new(profile, path);
            self.debouncer.add(key, delay, move || async move {
                let (profile, path) = (task.profile.clone(), task.path.clone());
                if let Err(e) = sink.submit(task).await {
                    warn!(profile = %profile, path = %path.display(), error = %e, "Dropping upload");
                }
            });
        }
    }

    /// Runs the event loop until `shutdown` fires or the event source closes
    pub async fn run(self, mut events: RawEventReceiver, shutdown: CancellationToken) {
        info!("Directory watcher event loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event),
                    None => {
                        warn!("Watcher event channel closed");
                        break;
                    }
                },
            }
        }

        info!("Directory watcher event loop stopped");
    }

    /// Cancels all pending timers and unwatches every profile
    pub fn close(&self) {
        self.debouncer.stop_all();
        for name in self.watched_profiles() {
            if let Err(e) = self.unwatch(&name) {
                debug!(profile = %name, error = %e, "Unwatch during close failed");
            }
        }
    }
}

/// All directories under `root` (inclusive), not following symlinks
fn collect_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

/// Selects the profile(s) owning `path`
///
/// A context owns `path` if `path` equals it or lies beneath it (whole path
/// components, so `/srv/site2` is not under `/srv/site`). Of the owners only
/// those with the deepest context are returned; equally deep contexts all
/// match. The result is sorted by name.
pub fn find_matching_profiles<'a>(
    path: &Path,
    contexts: impl IntoIterator<Item = (&'a str, &'a Path)>,
) -> Vec<String> {
    let mut best_depth = 0;
    let mut matches: Vec<String> = Vec::new();

    for (name, context) in contexts {
        if !path.starts_with(context) {
            continue;
        }
        let depth = context.components().count();
        if depth > best_depth {
            best_depth = depth;
            matches.clear();
        }
        if depth == best_depth {
            matches.push(name.to_string());
        }
    }

    matches.sort();
    matches
}

//! Integration test: watcher → debouncer → queue → consumer → notifier
//!
//! Uses real directory trees with a recording watch backend, a scripted
//! transfer executor and an in-memory notification service. Filesystem
//! events are fed to the watcher by hand; time is paused so debounce and
//! retry windows elapse instantly.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sftpsync_core::config::{Config, Profile};
use sftpsync_core::ports::{INotificationService, ITransferExecutor, Notification};
use sftpsync_core::registry::ProfileRegistry;
use sftpsync_sync::watcher::{FsEvent, FsEventKind, WatchBackend};
use sftpsync_sync::{ConfigReconciler, DirectoryWatcher, Notifier, UploadQueue, UploadSink};
use tempfile::TempDir;

struct NullBackend;

impl WatchBackend for NullBackend {
    fn subscribe(&mut self, _dir: &Path) -> notify::Result<()> {
        Ok(())
    }

    fn unsubscribe(&mut self, _dir: &Path) -> notify::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MockExecutor {
    fail: bool,
    uploads: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl ITransferExecutor for MockExecutor {
    async fn upload_file(&self, _profile: &Profile, path: &Path) -> anyhow::Result<()> {
        self.uploads.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            anyhow::bail!("Host not found");
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockNotifications {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl INotificationService for MockNotifications {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Pipeline {
    _dir: TempDir,
    context: PathBuf,
    watcher: DirectoryWatcher,
    queue: UploadQueue,
    consumer: tokio::task::JoinHandle<()>,
    executor: Arc<MockExecutor>,
    notifications: Arc<MockNotifications>,
}

async fn start_pipeline(fail: bool) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let context = dir.path().canonicalize().unwrap().join("site");
    std::fs::create_dir_all(context.join("css")).unwrap();

    let registry = ProfileRegistry::new();
    let watcher = DirectoryWatcher::with_backend(Box::new(NullBackend));
    let (queue, consumer) = UploadQueue::new(registry.clone());

    let executor = Arc::new(MockExecutor {
        fail,
        ..Default::default()
    });
    let notifications = Arc::new(MockNotifications::default());
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&notifications) as Arc<dyn INotificationService>
    ));
    let consumer = tokio::spawn(consumer.run(
        Arc::clone(&executor) as Arc<dyn ITransferExecutor>,
        notifier,
    ));

    let reconciler = ConfigReconciler::new(
        dir.path().join("config.json"),
        watcher.clone(),
        registry,
        Arc::new(queue.clone()) as Arc<dyn UploadSink>,
    );
    let mut config = Config::default();
    config.profiles.insert(
        "site".to_string(),
        Profile::new("example.com", "deploy", context.to_string_lossy())
            .with_password("pw")
            .with_auto_sync(true)
            .with_debounce_millis(300),
    );
    let report = reconciler.reconcile(&config).await;
    assert_eq!(report.started, vec!["site"]);

    Pipeline {
        _dir: dir,
        context,
        watcher,
        queue,
        consumer,
        executor,
        notifications,
    }
}

impl Pipeline {
    fn write(&self, relative: &str) -> PathBuf {
        let path = self.context.join(relative);
        std::fs::write(&path, relative).unwrap();
        self.watcher
            .handle_event(&FsEvent::new(&path, FsEventKind::Write));
        path
    }

    async fn shutdown(self) -> (Arc<MockExecutor>, Arc<MockNotifications>) {
        self.watcher.debouncer().stop_all();
        self.queue.stop();
        self.consumer.await.unwrap();
        (self.executor, self.notifications)
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_saves_uploads_once_and_notifies() {
    let pipeline = start_pipeline(false).await;

    let path = pipeline.context.join("css/site.css");
    for _ in 0..5 {
        pipeline.write("css/site.css");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (executor, notifications) = pipeline.shutdown().await;
    assert_eq!(executor.uploads.lock().unwrap().as_slice(), &[path]);

    let sent = notifications.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Auto-synced");
    assert_eq!(sent[0].body, "css/site.css → site");
}

#[tokio::test(start_paused = true)]
async fn test_failed_upload_retried_then_reported() {
    let pipeline = start_pipeline(true).await;

    pipeline.write("index.html");
    tokio::time::sleep(Duration::from_secs(10)).await;

    let (executor, notifications) = pipeline.shutdown().await;
    assert_eq!(executor.uploads.lock().unwrap().len(), 3);

    let sent = notifications.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Auto-sync failed");
    assert_eq!(sent[0].body, "index.html → site\nHost not found");
}

#[tokio::test(start_paused = true)]
async fn test_ignored_file_is_never_uploaded() {
    let pipeline = start_pipeline(false).await;
    let syncignore = pipeline.context.join(".syncignore");
    std::fs::write(&syncignore, "*.map\n").unwrap();
    pipeline
        .watcher
        .handle_event(&FsEvent::new(&syncignore, FsEventKind::Create));

    pipeline.write("app.js.map");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (executor, notifications) = pipeline.shutdown().await;
    assert!(executor.uploads.lock().unwrap().is_empty());
    assert!(notifications.sent.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_buffered_uploads() {
    let pipeline = start_pipeline(false).await;

    for name in ["a.html", "b.html", "c.html"] {
        pipeline.write(name);
    }
    // Let the timers fire so the tasks are queued but not yet necessarily run
    tokio::time::sleep(Duration::from_millis(400)).await;

    let (executor, _) = pipeline.shutdown().await;
    assert_eq!(executor.uploads.lock().unwrap().len(), 3);
}

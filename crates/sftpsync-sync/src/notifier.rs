//! Notification batching and backoff
//!
//! Decides, per profile, which upload outcomes are worth a desktop
//! notification:
//!
//! - **Success**: an isolated save is reported right away with its file
//!   name. A burst is coalesced into "N files" once 5 uploads accumulate, or
//!   at the next upload after 30s without a notification.
//! - **Failure**: reported on the 1st consecutive failure, then at 5 and 10,
//!   then every 10th (20, 30, ...). The count resets on the next success.
//!
//! Delivery goes through [`INotificationService`]; a delivery error is logged
//! and never reaches the upload pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sftpsync_core::ports::{INotificationService, Notification};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::queue::UploadObserver;

/// Successes that force an aggregate notification
pub const SUCCESS_BATCH_THRESHOLD: u32 = 5;

/// Quiet period after which the next success is reported immediately
pub const SUCCESS_BATCH_WINDOW: Duration = Duration::from_secs(30);

pub const SUCCESS_TITLE: &str = "Auto-synced";
pub const FAILURE_TITLE: &str = "Auto-sync failed";

/// Per-profile counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierState {
    /// Successes since the last success notification
    pub success_count: u32,
    pub last_success_notification: Option<Instant>,
    /// Consecutive failures since the last success
    pub error_count: u32,
}

/// Stateful success/failure notification policy
pub struct Notifier {
    service: Arc<dyn INotificationService>,
    states: DashMap<String, NotifierState>,
}

impl Notifier {
    pub fn new(service: Arc<dyn INotificationService>) -> Self {
        Self {
            service,
            states: DashMap::new(),
        }
    }

    /// Records a success and returns the notification to show, if any
    pub fn record_success(&self, profile: &str, relative: &Path) -> Option<Notification> {
        let now = Instant::now();
        let mut state = self.states.entry(profile.to_string()).or_default();
        state.success_count += 1;

        let quiet = state
            .last_success_notification
            .map_or(true, |last| now.duration_since(last) >= SUCCESS_BATCH_WINDOW);

        let body = if state.success_count == 1 && quiet {
            format!("{} → {}", relative.display(), profile)
        } else if state.success_count >= SUCCESS_BATCH_THRESHOLD || quiet {
            format!("{} files → {}", state.success_count, profile)
        } else {
            debug!(profile, count = state.success_count, "Batching success notification");
            return None;
        };

        state.success_count = 0;
        state.last_success_notification = Some(now);
        Some(Notification::success(SUCCESS_TITLE, body))
    }

    /// Records a failure and returns the notification to show, if any
    pub fn record_failure(
        &self,
        profile: &str,
        relative: &Path,
        error: &anyhow::Error,
    ) -> Option<Notification> {
        let count = {
            let mut state = self.states.entry(profile.to_string()).or_default();
            state.error_count += 1;
            state.error_count
        };

        if !should_report_failure(count) {
            debug!(profile, count, "Suppressing repeated failure notification");
            return None;
        }

        let body = if count == 1 {
            format!("{} → {}\n{:#}", relative.display(), profile, error)
        } else {
            format!("{} (failed {} times)\n{:#}", relative.display(), count, error)
        };
        Some(Notification::failure(FAILURE_TITLE, body))
    }

    /// Clears the consecutive failure count for `profile`
    pub fn reset_error_count(&self, profile: &str) {
        if let Some(mut state) = self.states.get_mut(profile) {
            state.error_count = 0;
        }
    }

    pub async fn notify_success(&self, profile: &str, relative: &Path) {
        if let Some(notification) = self.record_success(profile, relative) {
            self.deliver(&notification).await;
        }
    }

    pub async fn notify_error(&self, profile: &str, relative: &Path, error: &anyhow::Error) {
        if let Some(notification) = self.record_failure(profile, relative, error) {
            self.deliver(&notification).await;
        }
    }

    /// Current counters for `profile`
    pub fn state(&self, profile: &str) -> Option<NotifierState> {
        self.states.get(profile).map(|s| s.clone())
    }

    /// Drops all counters for `profile`
    pub fn forget(&self, profile: &str) {
        self.states.remove(profile);
    }

    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.service.notify(notification).await {
            warn!(title = %notification.title, error = %e, "Failed to deliver notification");
        }
    }
}

/// 1, 5, 10, then every 10th
fn should_report_failure(count: u32) -> bool {
    match count {
        0 => false,
        1 => true,
        2..=10 => count % 5 == 0,
        _ => count % 10 == 0,
    }
}

#[async_trait]
impl UploadObserver for Notifier {
    async fn on_success(&self, profile: &str, relative: &Path) {
        self.reset_error_count(profile);
        self.notify_success(profile, relative).await;
    }

    async fn on_failure(&self, profile: &str, relative: &Path, error: &anyhow::Error, _attempts: u32) {
        self.notify_error(profile, relative, error).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sftpsync_core::ports::{NotificationKind, Urgency};

    use super::*;

    #[derive(Default)]
    struct RecordingService {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl INotificationService for RecordingService {
        async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                anyhow::bail!("no notification daemon");
            }
            Ok(())
        }
    }

    fn notifier() -> Notifier {
        Notifier::new(Arc::new(RecordingService::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_shows_file_name() {
        let n = notifier();
        let note = n.record_success("site", Path::new("css/site.css")).unwrap();

        assert_eq!(note.title, "Auto-synced");
        assert_eq!(note.body, "css/site.css → site");
        assert_eq!(note.kind, NotificationKind::Success);
        assert_eq!(note.urgency, Urgency::Critical);
        assert_eq!(n.state("site").unwrap().success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_successes_in_window_emit_one_aggregate() {
        let n = notifier();
        n.record_success("site", Path::new("first.html")).unwrap();

        let mut emitted = Vec::new();
        for i in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            if let Some(note) = n.record_success("site", Path::new(&format!("f{i}.html"))) {
                emitted.push(note);
            }
        }

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].body, "5 files → site");
        assert_eq!(n.state("site").unwrap().success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_quiet_window_flushes_batch() {
        let n = notifier();
        n.record_success("site", Path::new("a")).unwrap();
        assert!(n.record_success("site", Path::new("b")).is_none());
        assert!(n.record_success("site", Path::new("c")).is_none());

        tokio::time::advance(SUCCESS_BATCH_WINDOW).await;
        let note = n.record_success("site", Path::new("d")).unwrap();
        assert_eq!(note.body, "3 files → site");
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_save_after_quiet_window_is_single() {
        let n = notifier();
        n.record_success("site", Path::new("a")).unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        let note = n.record_success("site", Path::new("b.html")).unwrap();
        assert_eq!(note.body, "b.html → site");
    }

    #[tokio::test(start_paused = true)]
    async fn test_profiles_are_independent() {
        let n = notifier();
        assert!(n.record_success("a", Path::new("x")).is_some());
        assert!(n.record_success("b", Path::new("x")).is_some());
    }

    #[test]
    fn test_failure_backoff_schedule() {
        let reported: Vec<u32> = (1..=45).filter(|&n| should_report_failure(n)).collect();
        assert_eq!(reported, vec![1, 5, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_failure_messages() {
        let n = notifier();
        let err = anyhow::anyhow!("Authentication failed");

        let first = n
            .record_failure("site", Path::new("index.html"), &err)
            .unwrap();
        assert_eq!(first.title, "Auto-sync failed");
        assert_eq!(first.body, "index.html → site\nAuthentication failed");
        assert_eq!(first.kind, NotificationKind::Failure);

        for _ in 2..5 {
            assert!(n.record_failure("site", Path::new("index.html"), &err).is_none());
        }
        let fifth = n
            .record_failure("site", Path::new("index.html"), &err)
            .unwrap();
        assert_eq!(fifth.body, "index.html (failed 5 times)\nAuthentication failed");
    }

    #[tokio::test]
    async fn test_success_resets_error_count() {
        let service = Arc::new(RecordingService::default());
        let n = Notifier::new(service.clone());
        let err = anyhow::anyhow!("Host not found");

        n.on_failure("site", Path::new("a"), &err, 3).await;
        n.on_failure("site", Path::new("a"), &err, 3).await;
        assert_eq!(n.state("site").unwrap().error_count, 2);

        n.on_success("site", Path::new("a")).await;
        assert_eq!(n.state("site").unwrap().error_count, 0);

        // Counting restarts, so the next failure is reported again
        n.on_failure("site", Path::new("a"), &err, 3).await;
        let sent = service.sent.lock().unwrap();
        let failures = sent
            .iter()
            .filter(|s| s.kind == NotificationKind::Failure)
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let service = Arc::new(RecordingService {
            fail: true,
            ..Default::default()
        });
        let n = Notifier::new(service.clone());

        n.notify_success("site", Path::new("a")).await;
        assert_eq!(service.sent.lock().unwrap().len(), 1);
        assert_eq!(n.state("site").unwrap().success_count, 0);
    }
}

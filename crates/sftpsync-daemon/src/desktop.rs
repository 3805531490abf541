//! Desktop notifications through `notify-send`

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sftpsync_core::ports::{INotificationService, Notification, NotificationKind};
use tokio::process::Command;
use tracing::trace;

const NOTIFY_SEND: &str = "notify-send";

/// [`INotificationService`] backed by libnotify's `notify-send`
#[derive(Debug, Clone, Default)]
pub struct NotifySendService;

impl NotifySendService {
    pub fn new() -> Self {
        Self
    }
}

/// `notify-send` arguments for `notification`
///
/// Titles get a check mark or a cross depending on the outcome.
pub fn notify_send_args(notification: &Notification) -> Vec<String> {
    let marker = match notification.kind {
        NotificationKind::Success => "✓",
        NotificationKind::Failure => "✗",
    };
    vec![
        "-u".to_string(),
        notification.urgency.to_string(),
        format!("{marker} {}", notification.title),
        notification.body.clone(),
    ]
}

#[async_trait]
impl INotificationService for NotifySendService {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        trace!(title = %notification.title, "Sending desktop notification");
        let status = Command::new(NOTIFY_SEND)
            .args(notify_send_args(notification))
            .status()
            .await
            .context("Failed to run notify-send")?;
        if !status.success() {
            bail!("notify-send exited with {status}");
        }
        Ok(())
    }
}

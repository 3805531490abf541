//! Notification service port (driven/secondary port)
//!
//! This module defines the interface for surfacing upload outcomes to the
//! user. The daemon implements it with `notify-send`; tests implement it
//! with an in-memory recorder.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because notification delivery is adapter-specific.
//! - Notifications are fire-and-forget; callers log delivery failures and
//!   carry on.

/// Urgency level for a notification
///
/// Maps one-to-one onto libnotify urgency levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Whether a notification reports a success or a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Failure,
}

/// A notification to display to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Short title, e.g. "Auto-synced"
    pub title: String,
    /// Body text with details about the event
    pub body: String,
    pub urgency: Urgency,
    pub kind: NotificationKind,
}

impl Notification {
    /// Creates a success notification
    ///
    /// Upload outcomes are always shown with `Critical` urgency so that they
    /// stay visible on desktops that auto-dismiss normal notifications.
    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgency: Urgency::Critical,
            kind: NotificationKind::Success,
        }
    }

    /// Creates a failure notification
    pub fn failure(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgency: Urgency::Critical,
            kind: NotificationKind::Failure,
        }
    }

    /// Sets the urgency level
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }
}

/// Port trait for desktop notifications
///
/// Implementations should gracefully handle delivery failures (e.g. no
/// notification daemon running) by returning an error rather than panicking.
#[async_trait::async_trait]
pub trait INotificationService: Send + Sync {
    /// Sends a desktop notification to the user
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are interfaces the sync pipeline depends on, but whose
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ITransferExecutor`] - Pushes a single local file to a profile's remote
//! - [`INotificationService`] - Desktop notifications

pub mod notification;
pub mod transfer;

pub use notification::{INotificationService, Notification, NotificationKind, Urgency};
pub use transfer::ITransferExecutor;

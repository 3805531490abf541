//! sftp-sync Core - Profiles, shared state and port definitions
//!
//! This crate contains the pieces every other sftp-sync crate agrees on:
//! - **Configuration** - `Profile` and `Config`, loaded from the JSON config file
//! - **Registry** - `ProfileRegistry`, the reader/writer-locked map of active profiles
//! - **Domain** - path containment helpers and domain error types
//! - **Ports** - Traits for adapters: `ITransferExecutor`, `INotificationService`
//!
//! # Architecture
//!
//! Ports define trait interfaces that adapter crates implement (`sftpsync-lftp`
//! for transfers, the daemon's `notify-send` sink for notifications). The sync
//! pipeline in `sftpsync-sync` only ever talks to these traits.

pub mod config;
pub mod domain;
pub mod ports;
pub mod registry;

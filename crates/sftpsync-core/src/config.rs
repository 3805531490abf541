//! Configuration module for sftp-sync.
//!
//! The configuration file is a JSON object mapping profile names to
//! [`Profile`] definitions. This module handles loading, defaults,
//! validation, and a builder-style API for programmatic use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::paths::expand_tilde;

/// Debounce applied when a profile leaves `autoSyncDebounceMillis` unset or 0.
pub const DEFAULT_DEBOUNCE_MILLIS: u64 = 2000;

/// Directory (under the XDG config dir) holding the configuration file.
pub const CONFIG_DIR_NAME: &str = "sftp-sync";

/// File name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.json";

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A named remote endpoint bound to a local context directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Path to an SSH private key (sftp only).
    pub ssh_key: String,
    pub port: u32,
    /// `ftp` or `sftp`.
    pub protocol: String,
    /// Remote directory that mirrors the context root.
    pub remote_path: String,
    /// Local directory whose changes are pushed to `remote_path`.
    pub context: String,
    /// Whether the daemon watches this profile's context.
    pub auto_sync: bool,
    /// Per-file quiet period before an upload is queued, in milliseconds.
    #[serde(alias = "autoSyncDebounce")]
    pub auto_sync_debounce_millis: u64,
}

impl Profile {
    /// Create a profile with the required fields set and everything else
    /// at its default.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        let mut profile = Self {
            host: host.into(),
            username: username.into(),
            context: context.into(),
            ..Self::default()
        };
        profile.apply_defaults();
        profile
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_ssh_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_key = key.into();
        self
    }

    /// Sets the protocol and re-derives the default port if the current
    /// port is the other protocol's default.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        if self.port == 21 || self.port == 22 {
            self.port = 0;
        }
        self.apply_defaults();
        self
    }

    pub fn with_port(mut self, port: u32) -> Self {
        self.port = port;
        self
    }

    pub fn with_remote_path(mut self, remote_path: impl Into<String>) -> Self {
        self.remote_path = remote_path.into();
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    pub fn with_debounce_millis(mut self, millis: u64) -> Self {
        self.auto_sync_debounce_millis = millis;
        self
    }

    /// Fill in optional fields left empty in the file.
    ///
    /// - `port`: 22 for sftp, 21 otherwise
    /// - `protocol`: `ftp`
    /// - `remote_path`: `/`
    pub fn apply_defaults(&mut self) {
        if self.port == 0 {
            self.port = if self.protocol == "sftp" { 22 } else { 21 };
        }
        if self.protocol.is_empty() {
            self.protocol = "ftp".to_string();
        }
        if self.remote_path.is_empty() {
            self.remote_path = "/".to_string();
        }
    }

    /// Context directory with `~` expanded. `None` when no context is set.
    pub fn context_path(&self) -> Option<PathBuf> {
        let trimmed = self.context.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(expand_tilde(trimmed))
        }
    }

    /// SSH key path with `~` expanded. `None` when no key is configured.
    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        if self.ssh_key.is_empty() {
            None
        } else {
            Some(expand_tilde(&self.ssh_key))
        }
    }

    /// Effective debounce window for this profile.
    pub fn debounce(&self) -> Duration {
        match self.auto_sync_debounce_millis {
            0 => Duration::from_millis(DEFAULT_DEBOUNCE_MILLIS),
            ms => Duration::from_millis(ms),
        }
    }

    /// Validate this profile, reporting every problem found.
    pub fn validate(&self, name: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ValidationError {
                profile: name.to_string(),
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.host.is_empty() {
            push("host", "missing required field");
        }
        if self.username.is_empty() {
            push("username", "missing required field");
        }
        if !VALID_PROTOCOLS.contains(&self.protocol.as_str()) {
            push("protocol", "must be 'ftp' or 'sftp'");
        }
        if self.port == 0 || self.port > 65535 {
            push("port", "must be between 1 and 65535");
        }
        if self.protocol == "sftp" {
            if self.password.is_empty() && self.ssh_key.is_empty() {
                push(
                    "password",
                    "password or sshKey required (at least one for SFTP)",
                );
            }
        } else if self.password.is_empty() {
            push("password", "missing required field");
        }

        errors
    }
}

/// Valid values for `protocol`.
const VALID_PROTOCOLS: &[&str] = &["ftp", "sftp"];

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Top-level configuration: every profile keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    pub profiles: BTreeMap<String, Profile>,
}

/// Errors raised while reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read config file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("invalid JSON syntax: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl Config {
    /// Load configuration from a JSON file at `path`, applying defaults to
    /// every profile. Validation is left to [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::Empty(_) => ConfigError::Empty(path.to_path_buf()),
            other => other,
        })
    }

    /// Parse configuration from a JSON string, applying defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(PathBuf::new()));
        }
        let mut config: Config = serde_json::from_str(content)?;
        for profile in config.profiles.values_mut() {
            profile.apply_defaults();
        }
        Ok(config)
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/sftp-sync/config.json` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Profiles with `autoSync` enabled, in name order.
    pub fn auto_sync_profiles(&self) -> impl Iterator<Item = (&String, &Profile)> {
        self.profiles.iter().filter(|(_, p)| p.auto_sync)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the profile the error belongs to.
    pub profile: String,
    /// Offending field, e.g. `"port"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "profile '{}': {}: {}", self.profile, self.field, self.message)
    }
}

impl Config {
    /// Validate every profile and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        self.profiles
            .iter()
            .flat_map(|(name, profile)| profile.validate(name))
            .collect()
    }

    /// Drop every invalid profile, returning the errors that disqualified
    /// them. The remaining profiles are unaffected.
    pub fn retain_valid(&mut self) -> Vec<ValidationError> {
        let mut rejected = Vec::new();
        self.profiles.retain(|name, profile| {
            let errors = profile.validate(name);
            let keep = errors.is_empty();
            rejected.extend(errors);
            keep
        });
        rejected
    }
}

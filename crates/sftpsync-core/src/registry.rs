//! Shared profile registry
//!
//! [`ProfileRegistry`] is the single source of truth for which profiles are
//! actively auto-syncing. The config reconciler is its only writer; the
//! upload consumer and the directory watcher read from it.
//!
//! Profiles are stored as `Arc<Profile>` snapshots. A writer replaces the
//! whole `Arc` rather than mutating fields in place, so a reader holding a
//! snapshot never observes a half-updated profile.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::config::Profile;

/// Map of profile name to the immutable snapshot currently in effect.
pub type ProfileMap = HashMap<String, Arc<Profile>>;

/// Reader/writer-locked registry of active profiles
///
/// Cloning the registry yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    inner: Arc<RwLock<ProfileMap>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `profiles`.
    pub fn from_profiles(profiles: impl IntoIterator<Item = (String, Profile)>) -> Self {
        let map = profiles
            .into_iter()
            .map(|(name, profile)| (name, Arc::new(profile)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Snapshot of a single profile. The read lock is released on return.
    pub async fn get(&self, name: &str) -> Option<Arc<Profile>> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.contains_key(name)
    }

    /// Snapshot of every profile currently registered.
    pub async fn snapshot(&self) -> ProfileMap {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Insert or replace a profile, returning the previous snapshot.
    pub async fn insert(
        &self,
        name: impl Into<String>,
        profile: impl Into<Arc<Profile>>,
    ) -> Option<Arc<Profile>> {
        self.inner
            .write()
            .await
            .insert(name.into(), profile.into())
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<Profile>> {
        self.inner.write().await.remove(name)
    }

    /// Exclusive access to the whole map for multi-step mutations.
    ///
    /// The guard releases the lock when dropped. Never hold it across I/O.
    pub async fn lock(&self) -> RwLockWriteGuard<'_, ProfileMap> {
        self.inner.write().await
    }
}

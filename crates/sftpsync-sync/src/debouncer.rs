//! Per-key debouncing
//!
//! A [`Debouncer`] holds at most one pending timer per key. Adding a key that
//! already has a pending timer cancels it and starts a fresh one, so a burst
//! of events for the same key produces a single callback once the key has
//! been quiet for the requested delay.
//!
//! Each timer is a spawned tokio task. When a timer fires it removes its own
//! entry from the table *before* running the callback; a `stop`/`stop_all`
//! racing a just-fired timer therefore finds nothing to cancel rather than
//! cancelling a callback that is already running.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

struct PendingTimer {
    /// Generation id; lets a woken timer detect that it was replaced
    id: u64,
    handle: JoinHandle<()>,
}

struct TimerTable<K> {
    next_id: u64,
    pending: HashMap<K, PendingTimer>,
}

/// Coalesces repeated triggers for the same key into one delayed callback
///
/// Cloning yields another handle to the same timer table.
pub struct Debouncer<K> {
    timers: Arc<Mutex<TimerTable<K>>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            timers: Arc::clone(&self.timers),
        }
    }
}

impl<K> Default for Debouncer<K> {
    fn default() -> Self {
        Self {
            timers: Arc::new(Mutex::new(TimerTable {
                next_id: 0,
                pending: HashMap::new(),
            })),
        }
    }
}

fn lock<K>(timers: &Mutex<TimerTable<K>>) -> MutexGuard<'_, TimerTable<K>> {
    // The table holds no invariants a panicking holder could break halfway
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to run once `delay` has elapsed with no further
    /// `add` for `key`
    ///
    /// Any timer already pending for `key` is cancelled without firing.
    /// Must be called from within a tokio runtime.
    pub fn add<F, Fut>(&self, key: K, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut table = lock(&self.timers);
        table.next_id += 1;
        let id = table.next_id;

        if let Some(previous) = table.pending.remove(&key) {
            previous.handle.abort();
            trace!(key = ?key, "Reset pending debounce timer");
        }

        let timers = Arc::clone(&self.timers);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut table = lock(&timers);
                match table.pending.get(&task_key) {
                    Some(timer) if timer.id == id => {
                        table.pending.remove(&task_key);
                    }
                    // Replaced or stopped while we were waking up
                    _ => return,
                }
            }

            debug!(key = ?task_key, "Debounce timer fired");
            callback().await;
        });

        table.pending.insert(key, PendingTimer { id, handle });
    }

    /// Cancels the pending timer for `key` without firing it
    ///
    /// Returns `true` if a timer was pending.
    pub fn stop(&self, key: &K) -> bool {
        match lock(&self.timers).pending.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer whose key matches `predicate`
    ///
    /// Returns the number of timers cancelled.
    pub fn stop_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut table = lock(&self.timers);
        let keys: Vec<K> = table
            .pending
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(timer) = table.pending.remove(key) {
                timer.handle.abort();
            }
        }
        keys.len()
    }

    /// Cancels every pending timer
    ///
    /// Intended for shutdown. No callback starts after this returns.
    pub fn stop_all(&self) -> usize {
        let mut table = lock(&self.timers);
        let count = table.pending.len();
        for (_, timer) in table.pending.drain() {
            timer.handle.abort();
        }
        if count > 0 {
            debug!(count, "Cancelled all pending debounce timers");
        }
        count
    }

    /// Returns true if a timer is pending for `key`
    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.timers).pending.contains_key(key)
    }

    /// Returns the number of pending timers
    pub fn pending_count(&self) -> usize {
        lock(&self.timers).pending.len()
    }
}

//! The top-level map from lock name to [`LockEntry`].
//!
//! The registry's own mutex is only ever held for the map lookup/insert/
//! remove itself — never across an entry operation — so creating a lock
//! and seating its first waiter happens in two steps: reserve the slot
//! here, then build the entry and publish it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

use crate::lock_entry::LockEntry;
use crate::waiter::Waiter;

/// Fixed namespace tag prefixed onto every client-supplied lock name before
/// it is used as a registry key, so this key space stays distinct from any
/// future namespaces sharing the same map.
pub const NAMESPACE_PREFIX: &[u8] = b"LOCK/";

/// Prefix a client-supplied lock name with [`NAMESPACE_PREFIX`] to produce
/// the registry key used for lookup/create/release.
pub fn namespaced_key(name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(NAMESPACE_PREFIX.len() + name.len());
    key.extend_from_slice(NAMESPACE_PREFIX);
    key.extend_from_slice(name);
    key
}

/// Global table of live locks, keyed by the namespaced lock name (see
/// [`namespaced_key`]).
pub struct LockRegistry {
    hold_timeout: Duration,
    entries: Mutex<HashMap<Vec<u8>, Arc<LockEntry>>>,
}

impl LockRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_hold_timeout(Duration::from_secs(20))
    }

    pub fn with_hold_timeout(hold_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold_timeout,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Look up an existing entry by name, without creating one.
    pub fn lookup(&self, name: &[u8]) -> Option<Arc<LockEntry>> {
        self.entries.lock().expect("registry poisoned").get(name).cloned()
    }

    /// Create a fresh entry with `waiter` seated as its sole holder, and
    /// publish it. Returns `None` if an entry for `name` already exists —
    /// callers should `lookup` first and only fall back to this on a miss,
    /// but a race between the miss and this call is still possible, so the
    /// `None` case must be handled by retrying via `lookup`/`acquire`.
    pub fn create_and_seat(
        self: &Arc<Self>,
        name: Vec<u8>,
        waiter: Arc<Waiter>,
    ) -> Option<Arc<LockEntry>> {
        let mut entries = self.entries.lock().expect("registry poisoned");
        if entries.contains_key(&name) {
            return None;
        }
        let entry = Arc::new(LockEntry::new_seated(
            name.clone(),
            Arc::downgrade(self),
            self.hold_timeout,
            waiter,
        ));
        entries.insert(name, entry.clone());
        Some(entry)
    }

    /// Drop an entry from the map once its last waiter has left. Called by
    /// [`LockEntry::release`] from inside its own state lock's critical
    /// section, so this must not try to re-enter the entry.
    pub fn remove(&self, name: &[u8]) {
        self.entries.lock().expect("registry poisoned").remove(name);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

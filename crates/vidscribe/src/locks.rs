//! Per-URL mutual exclusion, plus the lock that serializes job record writes.
//!
//! URL entries are created on first use and held weakly by the table, so a
//! URL's mutex lives exactly as long as someone holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Smallest table size at which dead weak references are pruned on insert.
const PRUNE_THRESHOLD: usize = 256;

type Slot = Arc<AsyncMutex<()>>;

/// Exclusive hold on one URL. Released on drop.
pub struct ResourceGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard").field("key", &self.key).finish()
    }
}

struct SlotTable {
    entries: HashMap<String, Weak<AsyncMutex<()>>>,
    /// Next size at which dead entries are pruned. Doubles past the live
    /// count after every prune so inserts stay amortized O(1).
    prune_at: usize,
    prunes: usize,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            prune_at: PRUNE_THRESHOLD,
            prunes: 0,
        }
    }
}

#[derive(Default)]
pub struct ResourceLocks {
    slots: Mutex<SlotTable>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and takes it.
    ///
    /// Waiters are served in FIFO order. Dropping the returned future
    /// before it resolves gives up the place in line.
    pub async fn acquire(&self, key: &str) -> ResourceGuard {
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        ResourceGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Takes `key` if nobody holds it right now.
    pub fn try_acquire(&self, key: &str) -> Option<ResourceGuard> {
        let slot = self.slot(key);
        let guard = slot.try_lock_owned().ok()?;
        Some(ResourceGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    /// Number of keys with a live holder or waiter.
    pub fn len(&self) -> usize {
        self.slots()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots();
        if let Some(existing) = slots.entries.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        if slots.entries.len() >= slots.prune_at {
            slots.entries.retain(|_, weak| weak.strong_count() > 0);
            slots.prune_at = PRUNE_THRESHOLD.max(slots.entries.len() * 2);
            slots.prunes += 1;
        }

        let slot: Slot = Arc::new(AsyncMutex::new(()));
        slots.entries.insert(key.to_string(), Arc::downgrade(&slot));
        slot
    }

    fn slots(&self) -> MutexGuard<'_, SlotTable> {
        match self.slots.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Resource lock table was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Serializes every read-check-write of a job record between the facade and
/// the workers. Clones share the same lock.
#[derive(Clone, Default)]
pub struct RecordLock {
    inner: Arc<Mutex<()>>,
}

impl RecordLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Record lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

//! # Per-Id Locks
//!
//! One re-entrant mutex per descriptor id, created on demand. A thread that
//! holds the guard for an id may take it again (the facade's `get` inside a
//! locked `put`, for instance); distinct ids never contend. Waiting has no
//! timeout.
//!
//! The table holds only `Weak` references: a mutex lives exactly as long as
//! some guard or waiter holds it, and dead table entries are swept as the
//! table grows.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::lock_api::ArcReentrantMutexGuard;
use parking_lot::{Mutex, RawMutex, RawThreadId, ReentrantMutex};

const SWEEP_FLOOR: usize = 1024;

type Slot = ReentrantMutex<()>;

/// Exclusive, re-entrant hold on one id. Released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct KeyGuard {
    id: String,
    _held: ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>,
}

impl KeyGuard {
    /// The id this guard holds.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("id", &self.id).finish()
    }
}

struct Table {
    slots: HashMap<String, Weak<Slot>>,
    sweep_at: usize,
}

/// Table of per-id re-entrant mutexes.
pub struct KeyLock {
    table: Mutex<Table>,
}

impl Default for KeyLock {
    fn default() -> Self {
        Self {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                sweep_at: SWEEP_FLOOR,
            }),
        }
    }
}

impl std::fmt::Debug for KeyLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLock").field("live", &self.live()).finish()
    }
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until this thread holds `id`.
    pub fn lock(&self, id: &str) -> KeyGuard {
        let slot = self.slot(id);
        KeyGuard {
            id: id.to_string(),
            _held: slot.lock_arc(),
        }
    }

    /// Take `id` only if no other thread holds it.
    pub fn try_lock(&self, id: &str) -> Option<KeyGuard> {
        let slot = self.slot(id);
        slot.try_lock_arc().map(|held| KeyGuard {
            id: id.to_string(),
            _held: held,
        })
    }

    fn slot(&self, id: &str) -> Arc<Slot> {
        let mut table = self.table.lock();
        if let Some(slot) = table.slots.get(id).and_then(Weak::upgrade) {
            return slot;
        }
        let slot = Arc::new(ReentrantMutex::new(()));
        table.slots.insert(id.to_string(), Arc::downgrade(&slot));
        if table.slots.len() >= table.sweep_at {
            table.slots.retain(|_, w| w.strong_count() > 0);
            table.sweep_at = (table.slots.len() * 2).max(SWEEP_FLOOR);
        }
        slot
    }

    /// Ids with a live mutex (held or awaited).
    pub fn live(&self) -> usize {
        self.table
            .lock()
            .slots
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Drop table entries nobody references any more.
    pub fn sweep(&self) {
        self.table.lock().slots.retain(|_, w| w.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_thread_reenters() {
        let locks = KeyLock::new();
        let outer = locks.lock("a");
        let inner = locks.lock("a");
        assert_eq!(inner.id(), outer.id());
    }

    #[test]
    fn other_threads_are_excluded() {
        let locks = KeyLock::new();
        let held = locks.lock("a");
        thread::scope(|s| {
            s.spawn(|| assert!(locks.try_lock("a").is_none()));
        });
        drop(held);
        thread::scope(|s| {
            s.spawn(|| assert!(locks.try_lock("a").is_some()));
        });
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let locks = KeyLock::new();
        let _a = locks.lock("a");
        thread::scope(|s| {
            s.spawn(|| assert!(locks.try_lock("b").is_some()));
        });
    }

    #[test]
    fn critical_sections_never_overlap() {
        let locks = KeyLock::new();
        let inside = AtomicBool::new(false);
        let entered = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let _g = locks.lock("shared");
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        entered.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(10));
                        inside.store(false, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(entered.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn entries_are_reclaimed() {
        let locks = KeyLock::new();
        {
            let _a = locks.lock("a");
            let _b = locks.lock("b");
            assert_eq!(locks.live(), 2);
        }
        assert_eq!(locks.live(), 0);
        locks.sweep();
        assert!(locks.table.lock().slots.is_empty());
    }
}

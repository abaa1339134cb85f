//! Priority admission queue gating how many items download at once.
//!
//! See `SPEC_FULL.md` §4.8. Everything here is synchronous and guarded by one
//! coarse-grained mutex, matching the concurrency model in §5 ("Queue
//! internal state: single mutex ... all reads and writes serialize through
//! it"). The manager/CLI, which run on `tokio`, call these methods directly;
//! none of them block on I/O.

use crate::error::DdmError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Admission priority. Declared low-to-high so the derived `Ord` gives
/// `High > Normal > Low`, matching the spec's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone)]
struct WaitingEntry {
    hash: String,
    priority: Priority,
}

/// Snapshot of queue state for persistence (`SPEC_FULL.md` §4.8 `get_state`/`load_state`).
/// Active items are deliberately not captured; on restore they are re-queued
/// by whatever higher layer owns that decision (see `SPEC_FULL.md` §9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueState {
    pub max_concurrent: usize,
    pub paused: bool,
    pub waiting: Vec<(String, Priority)>,
}

/// Capability set invoked when the queue admits a hash to run. One method,
/// default no-op, per the handler-capability-set pattern used by the engine
/// (`SPEC_FULL.md` §4.9) — no nullable callback field.
pub trait QueueHandlers: Send + Sync {
    fn on_start(&self, _hash: &str) {}
}

/// No-op handler set, useful for tests.
pub struct NullQueueHandlers;
impl QueueHandlers for NullQueueHandlers {}

struct Inner {
    max_concurrent: usize,
    paused: bool,
    active: Vec<String>,
    waiting: Vec<WaitingEntry>,
}

/// FIFO-within-priority admission queue. `add`/`on_complete`/`move_to`/
/// `pause`/`resume` are all mutually exclusive under one lock; the handler
/// callback for a newly-admitted hash is invoked after the lock is released.
pub struct QueueManager {
    inner: Mutex<Inner>,
    handlers: Arc<dyn QueueHandlers>,
}

impl QueueManager {
    pub fn new(max_concurrent: usize, handlers: Arc<dyn QueueHandlers>) -> Self {
        QueueManager {
            inner: Mutex::new(Inner {
                max_concurrent,
                paused: false,
                active: Vec::new(),
                waiting: Vec::new(),
            }),
            handlers,
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    pub fn is_active(&self, hash: &str) -> bool {
        self.inner.lock().unwrap().active.iter().any(|h| h == hash)
    }

    pub fn is_waiting(&self, hash: &str) -> bool {
        self.inner.lock().unwrap().waiting.iter().any(|e| e.hash == hash)
    }

    /// Admit `hash` at `priority`. No-op if already active or already waiting.
    pub fn add(&self, hash: impl Into<String>, priority: Priority) {
        let hash = hash.into();
        let started = {
            let mut inner = self.inner.lock().unwrap();
            if inner.active.iter().any(|h| h == &hash) || inner.waiting.iter().any(|e| e.hash == hash) {
                return;
            }
            if !inner.paused && inner.active.len() < inner.max_concurrent {
                inner.active.push(hash.clone());
                true
            } else {
                let insert_at = inner
                    .waiting
                    .iter()
                    .position(|e| e.priority < priority)
                    .unwrap_or(inner.waiting.len());
                inner.waiting.insert(insert_at, WaitingEntry { hash: hash.clone(), priority });
                false
            }
        };
        if started {
            tracing::info!(hash = %hash, "queue admitted item immediately");
            self.handlers.on_start(&hash);
        } else {
            tracing::info!(hash = %hash, ?priority, "queue item waiting");
        }
    }

    /// Remove `hash` from active; promote waiting work up to capacity if not paused.
    pub fn on_complete(&self, hash: &str) {
        let promoted = {
            let mut inner = self.inner.lock().unwrap();
            inner.active.retain(|h| h != hash);
            self.drain_waiting(&mut inner)
        };
        for h in promoted {
            tracing::info!(hash = %h, "queue promoted waiting item");
            self.handlers.on_start(&h);
        }
    }

    /// Reorder `hash` within the waiting list. `target_index` is clamped to
    /// `[0, len)`. Fails if `hash` is active or not found waiting.
    pub fn move_to(&self, hash: &str, target_index: usize) -> Result<(), DdmError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.active.iter().any(|h| h == hash) {
            return Err(DdmError::CannotMoveActive { hash: hash.to_string() });
        }
        let Some(pos) = inner.waiting.iter().position(|e| e.hash == hash) else {
            return Err(DdmError::QueueHashNotFound { hash: hash.to_string() });
        };
        let entry = inner.waiting.remove(pos);
        let len_after_removal = inner.waiting.len();
        let clamped = target_index.min(len_after_removal);
        inner.waiting.insert(clamped, entry);
        Ok(())
    }

    /// Stop admitting new work. Already-active items are unaffected.
    pub fn pause(&self) {
        self.inner.lock().unwrap().paused = true;
    }

    /// Resume admission and promote waiters up to capacity in one burst.
    pub fn resume(&self) {
        let promoted = {
            let mut inner = self.inner.lock().unwrap();
            inner.paused = false;
            self.drain_waiting(&mut inner)
        };
        for h in promoted {
            tracing::info!(hash = %h, "queue promoted waiting item after resume");
            self.handlers.on_start(&h);
        }
    }

    /// Snapshot `max_concurrent`, `paused`, and the waiting list. Active items
    /// are NOT captured (see `SPEC_FULL.md` §4.8).
    pub fn get_state(&self) -> QueueState {
        let inner = self.inner.lock().unwrap();
        QueueState {
            max_concurrent: inner.max_concurrent,
            paused: inner.paused,
            waiting: inner.waiting.iter().map(|e| (e.hash.clone(), e.priority)).collect(),
        }
    }

    /// Restore `max_concurrent`, `paused`, and the waiting list. `active` is
    /// left empty; the caller re-queues or re-activates previously-active
    /// items explicitly (see `SPEC_FULL.md` §9).
    pub fn load_state(&self, state: QueueState) {
        let mut inner = self.inner.lock().unwrap();
        inner.max_concurrent = state.max_concurrent;
        inner.paused = state.paused;
        inner.active.clear();
        inner.waiting = state
            .waiting
            .into_iter()
            .map(|(hash, priority)| WaitingEntry { hash, priority })
            .collect();
    }

    /// Pops waiting entries into `active` while capacity and pause state
    /// allow, returning the hashes promoted so the caller can invoke
    /// `on_start` outside the lock.
    fn drain_waiting(&self, inner: &mut Inner) -> Vec<String> {
        let mut promoted = Vec::new();
        if inner.paused {
            return promoted;
        }
        while inner.active.len() < inner.max_concurrent {
            let Some(entry) = inner.waiting.first().cloned() else {
                break;
            };
            inner.waiting.remove(0);
            inner.active.push(entry.hash.clone());
            promoted.push(entry.hash);
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingHandlers {
        started: StdMutex<Vec<String>>,
    }
    impl RecordingHandlers {
        fn new() -> Arc<Self> {
            Arc::new(RecordingHandlers { started: StdMutex::new(Vec::new()) })
        }
        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }
    impl QueueHandlers for RecordingHandlers {
        fn on_start(&self, hash: &str) {
            self.started.lock().unwrap().push(hash.to_string());
        }
    }

    #[test]
    fn add_starts_immediately_under_capacity() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(2, h.clone());
        q.add("a", Priority::Normal);
        assert!(q.is_active("a"));
        assert_eq!(h.started(), vec!["a"]);
    }

    #[test]
    fn add_queues_when_at_capacity() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h.clone());
        q.add("a", Priority::Normal);
        q.add("b", Priority::Normal);
        assert!(q.is_active("a"));
        assert!(q.is_waiting("b"));
        assert_eq!(h.started(), vec!["a"]);
    }

    #[test]
    fn add_ignores_duplicate_hash() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h.clone());
        q.add("a", Priority::Normal);
        q.add("a", Priority::High);
        assert_eq!(h.started(), vec!["a"]);
        assert_eq!(q.active_count(), 1);
    }

    #[test]
    fn priority_queue_example_from_spec() {
        // max_concurrent = 1; add(a, Normal); add(b, Low); add(c, High); on_complete(a).
        // Expected: c starts next.
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h.clone());
        q.add("a", Priority::Normal);
        q.add("b", Priority::Low);
        q.add("c", Priority::High);
        q.on_complete("a");
        assert_eq!(h.started(), vec!["a", "c"]);
        assert!(q.is_active("c"));
        assert!(q.is_waiting("b"));
    }

    #[test]
    fn fifo_within_same_priority() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h.clone());
        q.add("a", Priority::Normal);
        q.add("b", Priority::Normal);
        q.add("c", Priority::Normal);
        q.on_complete("a");
        assert_eq!(h.started(), vec!["a", "b"]);
    }

    #[test]
    fn on_complete_never_exceeds_max_concurrent() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(2, h.clone());
        q.add("a", Priority::Normal);
        q.add("b", Priority::Normal);
        q.add("c", Priority::Normal);
        assert_eq!(q.active_count(), 2);
        q.on_complete("a");
        assert_eq!(q.active_count(), 2);
        assert!(q.is_active("c"));
    }

    #[test]
    fn move_with_out_of_range_index_clamps() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h);
        q.add("a", Priority::Normal);
        q.add("b", Priority::Normal);
        q.add("c", Priority::Normal);
        q.move_to("c", 9999).unwrap();
        let state = q.get_state();
        let order: Vec<&str> = state.waiting.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(order, vec!["b", "c"]);
    }

    #[test]
    fn move_active_hash_fails() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h);
        q.add("a", Priority::Normal);
        let err = q.move_to("a", 0).unwrap_err();
        assert!(matches!(err, DdmError::CannotMoveActive { .. }));
    }

    #[test]
    fn move_unknown_hash_fails() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h);
        let err = q.move_to("ghost", 0).unwrap_err();
        assert!(matches!(err, DdmError::QueueHashNotFound { .. }));
    }

    #[test]
    fn pause_blocks_admission_resume_bursts_promotions() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(2, h.clone());
        q.pause();
        q.add("a", Priority::Normal);
        q.add("b", Priority::Normal);
        assert!(h.started().is_empty());
        assert!(q.is_waiting("a"));
        assert!(q.is_waiting("b"));

        q.resume();
        assert_eq!(q.active_count(), 2);
        assert_eq!(h.started(), vec!["a", "b"]);
    }

    #[test]
    fn get_state_excludes_active_items() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h);
        q.add("a", Priority::Normal);
        q.add("b", Priority::High);
        let state = q.get_state();
        assert_eq!(state.waiting, vec![("b".to_string(), Priority::High)]);
    }

    #[test]
    fn load_state_restores_waiting_with_empty_active() {
        let h = RecordingHandlers::new();
        let q = QueueManager::new(1, h);
        q.load_state(QueueState {
            max_concurrent: 3,
            paused: true,
            waiting: vec![("x".to_string(), Priority::Normal)],
        });
        assert_eq!(q.active_count(), 0);
        assert!(q.is_waiting("x"));
        let state = q.get_state();
        assert_eq!(state.max_concurrent, 3);
        assert!(state.paused);
    }

    #[test]
    fn priority_ordering_matches_spec() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}

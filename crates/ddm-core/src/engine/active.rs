//! Work-stealing registry: live metadata for every currently-downloading part.
//!
//! Keyed by part hash, per `SPEC_FULL.md` §3 ("Engine state"). Each entry
//! shares its `boundary` and `bytes_read` atomics with the `Part` task that
//! owns them, so the coordinator can read progress and shrink a victim's
//! range without the part task's cooperation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::steal::Candidate;

/// Live metadata for one active part, shared between its task and the engine.
pub struct ActiveEntry {
    pub initial_offset: u64,
    pub boundary: Arc<AtomicU64>,
    pub bytes_read: Arc<AtomicU64>,
    /// Set once this part has been stolen from; a victim can only be stolen
    /// from once (see `SPEC_FULL.md` §4.2 work-stealing).
    pub already_stolen: Arc<AtomicBool>,
    /// Non-zero while this part is mid-retry; steal candidates exclude it
    /// (open question in `SPEC_FULL.md` §9).
    pub retry_attempts: Arc<AtomicU32>,
    pub started_at: Instant,
    /// Guards mutation of this entry's `boundary` during a steal so two
    /// completions can't race to steal the same victim.
    pub steal_lock: Mutex<()>,
}

impl ActiveEntry {
    pub fn new(initial_offset: u64, boundary: Arc<AtomicU64>, bytes_read: Arc<AtomicU64>) -> Self {
        ActiveEntry {
            initial_offset,
            boundary,
            bytes_read,
            already_stolen: Arc::new(AtomicBool::new(false)),
            retry_attempts: Arc::new(AtomicU32::new(0)),
            started_at: Instant::now(),
            steal_lock: Mutex::new(()),
        }
    }

    fn remaining(&self) -> u64 {
        let pos = self.initial_offset + self.bytes_read.load(Ordering::Relaxed);
        self.boundary.load(Ordering::Relaxed).saturating_sub(pos)
    }
}

/// Registry of all parts currently in flight, keyed by part hash.
#[derive(Default)]
pub struct ActiveRegistry {
    entries: Mutex<HashMap<String, Arc<ActiveEntry>>>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: String, entry: Arc<ActiveEntry>) {
        self.entries.lock().unwrap().insert(hash, entry);
    }

    pub fn remove(&self, hash: &str) {
        self.entries.lock().unwrap().remove(hash);
    }

    pub fn get(&self, hash: &str) -> Option<Arc<ActiveEntry>> {
        self.entries.lock().unwrap().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Picks the best steal victim, excluding `exclude_hash` (normally the
    /// part that just completed). Returns the victim's hash and entry.
    pub fn pick_victim(&self, exclude_hash: &str) -> Option<(String, Arc<ActiveEntry>)> {
        let entries = self.entries.lock().unwrap();
        let hashes: Vec<&String> = entries.keys().filter(|h| h.as_str() != exclude_hash).collect();
        let candidates: Vec<Candidate> = hashes
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let e = &entries[*h];
                Candidate {
                    hash_index: i,
                    remaining: e.remaining(),
                    already_stolen: e.already_stolen.load(Ordering::Relaxed),
                    retry_attempts: e.retry_attempts.load(Ordering::Relaxed),
                }
            })
            .collect();
        let idx = super::steal::pick_victim(&candidates)?;
        let hash = hashes[idx].clone();
        let entry = Arc::clone(&entries[&hash]);
        Some((hash, entry))
    }
}

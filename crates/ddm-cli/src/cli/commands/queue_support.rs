//! Shared queue-state helpers for the commands that mutate the persisted
//! queue without driving a live `QueueManager` (`add`, `pause`, `resume`).
//! Only `run` constructs a real `QueueManager` backed by the manager's
//! `start_download` handlers; every other command reads/edits the same
//! persisted `QueueState` row directly, matching the ordering rule
//! `QueueManager::add` itself uses (`SPEC_FULL.md` §4.8).

use anyhow::Result;
use ddm_core::manager::Manager;
use ddm_core::queue::{Priority, QueueState};

pub async fn load_queue_state(manager: &Manager, default_max_concurrent: usize) -> Result<QueueState> {
    Ok(manager.load_queue_state().await?.unwrap_or(QueueState {
        max_concurrent: default_max_concurrent,
        paused: false,
        waiting: Vec::new(),
    }))
}

/// Insert `hash` into `state.waiting`, FIFO-within-priority, `High > Normal >
/// Low`. No-op if already present.
pub fn enqueue_waiting(state: &mut QueueState, hash: String, priority: Priority) {
    if state.waiting.iter().any(|(h, _)| h == &hash) {
        return;
    }
    let insert_at = state.waiting.iter().position(|(_, p)| *p < priority).unwrap_or(state.waiting.len());
    state.waiting.insert(insert_at, (hash, priority));
}

//! `ddm run` – drain the admission queue, downloading with bounded concurrency.

use anyhow::Result;
use ddm_core::config::DdmConfig;
use ddm_core::host_policy::HostPolicy;
use ddm_core::manager::Manager;
use ddm_core::queue::{Priority, QueueHandlers, QueueManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::queue_support;

/// Shared state behind the queue's handler set: the manager to run items
/// against, a back-reference to the queue itself (so a finished download can
/// promote the next waiter), and the inflight counter the run loop waits on.
struct RunState {
    manager: Manager,
    queue: Mutex<Option<Arc<QueueManager>>>,
    inflight: AtomicUsize,
    notify: Notify,
}

struct RunHandlers(Arc<RunState>);

impl QueueHandlers for RunHandlers {
    fn on_start(&self, hash: &str) {
        self.0.inflight.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.0);
        let hash = hash.to_string();
        tokio::spawn(async move {
            if let Err(e) = state.manager.run_one(&hash).await {
                tracing::error!(hash = %hash, error = %e, "download failed");
            }
            if let Some(queue) = state.queue.lock().unwrap().clone() {
                queue.on_complete(&hash);
            }
            if state.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
                state.notify.notify_waiters();
            }
        });
    }
}

/// Drains the admission queue: re-admits every incomplete item from the last
/// persisted snapshot, then blocks until every active and promoted download
/// finishes. Unlike the old per-process scheduler loop, progress itself is
/// reported by `EngineHandlers`/`tracing`, not a dedicated stats channel —
/// the engine model has no decoupled progress bus to poll (`SPEC_FULL.md` §4.9).
pub async fn run_scheduler(manager: &Manager, cfg: &DdmConfig) -> Result<()> {
    let state = Arc::new(RunState {
        manager: manager.clone(),
        queue: Mutex::new(None),
        inflight: AtomicUsize::new(0),
        notify: Notify::new(),
    });
    let handlers: Arc<dyn QueueHandlers> = Arc::new(RunHandlers(Arc::clone(&state)));
    let queue = Arc::new(QueueManager::new(cfg.default_queue_max_concurrent, handlers));
    *state.queue.lock().unwrap() = Some(Arc::clone(&queue));

    let persisted = queue_support::load_queue_state(manager, cfg.default_queue_max_concurrent).await?;
    let was_paused = persisted.paused;
    queue.load_state(persisted);

    // `load_state` never restores `active` (SPEC_FULL.md §4.8): re-admit every
    // incomplete item so previously-active-but-orphaned downloads (the
    // process that ran them exited without finishing) resume this run, while
    // already-waiting items are no-ops against the queue's duplicate guard.
    let mut admitted = 0u32;
    for item in manager.list_items() {
        if !item.completed() {
            queue.add(item.hash.clone(), Priority::Normal);
            admitted += 1;
        }
    }

    if admitted == 0 {
        println!("No queued downloads.");
    } else if was_paused {
        println!("Queue is paused; no new downloads will start. Run `ddm resume` first.");
    }

    loop {
        let notified = state.notify.notified();
        if state.inflight.load(Ordering::SeqCst) == 0 {
            break;
        }
        notified.await;
    }

    manager.save_queue_state(&queue.get_state()).await?;

    if let Ok(path) = HostPolicy::default_path() {
        if manager.save_host_policy(&path).is_err() {
            tracing::warn!("could not save host policy to {}", path.display());
        }
    }

    if admitted > 0 {
        tracing::info!("run drained {} queued download(s)", admitted);
    }
    Ok(())
}

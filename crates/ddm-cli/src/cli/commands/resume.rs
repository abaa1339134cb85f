//! `ddm resume` – clear the queue's paused flag (global, not per-item).
//! Waiters are promoted the next time `ddm run` drains the queue.

use anyhow::Result;
use ddm_core::manager::Manager;

use super::queue_support;

pub async fn run_resume(manager: &Manager, default_max_concurrent: usize) -> Result<()> {
    let mut state = queue_support::load_queue_state(manager, default_max_concurrent).await?;
    state.paused = false;
    manager.save_queue_state(&state).await?;
    println!("Queue resumed. Run `ddm run` to process waiting downloads.");
    Ok(())
}

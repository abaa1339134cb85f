//! `ddm pause` – stop admitting new work from the queue (global, not per-item).

use anyhow::Result;
use ddm_core::manager::Manager;

use super::queue_support;

pub async fn run_pause(manager: &Manager, default_max_concurrent: usize) -> Result<()> {
    let mut state = queue_support::load_queue_state(manager, default_max_concurrent).await?;
    state.paused = true;
    manager.save_queue_state(&state).await?;
    println!("Queue paused. Already-active downloads are unaffected.");
    Ok(())
}

//! `ddm remove <hash>` – remove a download.

use anyhow::Result;
use ddm_core::manager::Manager;

use super::queue_support;

pub async fn run_remove(manager: &Manager, hash: &str, delete_files: bool, default_max_concurrent: usize) -> Result<()> {
    if delete_files {
        if let Some(item) = manager.get_item(hash) {
            match tokio::fs::remove_file(&item.absolute_location).await {
                Ok(()) => tracing::debug!("removed {}", item.absolute_location.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    manager.flush_one(hash).await?;

    let mut state = queue_support::load_queue_state(manager, default_max_concurrent).await?;
    state.waiting.retain(|(h, _)| h != hash);
    manager.save_queue_state(&state).await?;

    println!("Removed download {hash}");
    Ok(())
}

//! `ddm add <url>` – register a new download and enqueue it.

use anyhow::Result;
use ddm_core::config::DdmConfig;
use ddm_core::headers::HeaderList;
use ddm_core::manager::Manager;
use ddm_core::queue::Priority;
use std::path::Path;

use super::queue_support;

pub async fn run_add(
    manager: &Manager,
    cfg: &DdmConfig,
    url: &str,
    download_dir: Option<&Path>,
    priority: Priority,
) -> Result<()> {
    let dir = match download_dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let item = manager.add(url.to_string(), HeaderList::default(), dir).await?;

    let mut state = queue_support::load_queue_state(manager, cfg.default_queue_max_concurrent).await?;
    queue_support::enqueue_waiting(&mut state, item.hash.clone(), priority);
    manager.save_queue_state(&state).await?;

    println!("Added download {} for URL: {url}", item.hash);
    Ok(())
}

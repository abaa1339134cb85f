//! `ddm import-har <path>` – register a download from a captured HAR file.

use anyhow::Result;
use ddm_core::config::DdmConfig;
use ddm_core::har;
use ddm_core::headers::HeaderList;
use ddm_core::manager::Manager;
use ddm_core::queue::Priority;
use std::path::Path;

use super::queue_support;

pub async fn run_import_har(manager: &Manager, cfg: &DdmConfig, path: &Path, allow_cookies: bool) -> Result<()> {
    let spec = har::resolve_har(path, allow_cookies)?;
    let has_headers = !spec.headers.is_empty();
    let headers = HeaderList::from_map(&spec.headers);
    let download_dir = std::env::current_dir()?;

    let item = manager.add(spec.url.clone(), headers, download_dir).await?;

    let mut state = queue_support::load_queue_state(manager, cfg.default_queue_max_concurrent).await?;
    queue_support::enqueue_waiting(&mut state, item.hash.clone(), Priority::Normal);
    manager.save_queue_state(&state).await?;

    println!("Added download {} for URL: {}", item.hash, spec.url);
    if allow_cookies && has_headers {
        println!("  (cookies included; stored with download)");
    }
    Ok(())
}

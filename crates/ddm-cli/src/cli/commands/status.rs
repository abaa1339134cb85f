//! `ddm status` – show status of all downloads.

use anyhow::Result;
use ddm_core::manager::Manager;

pub async fn run_status(manager: &Manager) -> Result<()> {
    let items = manager.list_items();
    if items.is_empty() {
        println!("No downloads in database.");
        return Ok(());
    }

    println!("{:<10} {:<12} {:<12} {:<12} {}", "HASH", "STATE", "DOWNLOADED", "SIZE", "URL");
    for item in items {
        let state = if item.completed() {
            "completed"
        } else if manager.is_downloading(&item.hash) {
            "downloading"
        } else {
            "queued"
        };
        let size_str = item.total_size().bytes().map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<12} {:<12} {:<12} {}",
            item.hash,
            state,
            item.downloaded(),
            size_str,
            item.url
        );
    }
    Ok(())
}

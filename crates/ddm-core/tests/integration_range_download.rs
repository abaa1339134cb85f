//! Integration test: local HTTP server with Range support, multi-segment
//! download, completion, and crash-resume through `Manager`/`Engine`.

mod common;

use ddm_core::config::DdmConfig;
use ddm_core::headers::HeaderList;
use ddm_core::manager::Manager;
use ddm_core::resume_db::ResumeDb;
use tempfile::tempdir;

async fn test_manager(state_dir: &std::path::Path, data_root: std::path::PathBuf) -> Manager {
    let db_path = state_dir.join("jobs.db");
    let db = ResumeDb::open_at(&db_path).await.unwrap();
    Manager::init(DdmConfig::default(), db, data_root).await.unwrap()
}

#[tokio::test]
async fn multi_segment_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(2 * 1024 * 1024).collect();
    let url = common::range_server::start(body.clone());

    let download_dir = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let manager = test_manager(state_dir.path(), state_dir.path().join("data")).await;

    let item = manager
        .add(url, HeaderList::new(), download_dir.path().to_path_buf())
        .await
        .expect("add");
    manager.run_one(&item.hash).await.expect("run_one");

    let item = manager.get_item(&item.hash).expect("item still registered");
    assert!(item.completed(), "item should be marked completed");
    assert_eq!(item.downloaded(), body.len() as u64);

    let content = std::fs::read(&item.absolute_location).unwrap();
    assert_eq!(content.len(), body.len(), "file size must match");
    assert_eq!(content, body, "file content must match");
}

#[tokio::test]
async fn no_range_server_falls_back_to_single_stream_get() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
        },
    );

    let download_dir = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let manager = test_manager(state_dir.path(), state_dir.path().join("data")).await;

    let item = manager
        .add(url, HeaderList::new(), download_dir.path().to_path_buf())
        .await
        .expect("add");
    assert!(!item.resumable(), "non-range origin must be marked non-resumable");

    manager.run_one(&item.hash).await.expect("run_one");

    let item = manager.get_item(&item.hash).expect("item still registered");
    assert!(item.completed());
    let content = std::fs::read(&item.absolute_location).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe_and_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: false,
            support_ranges: true,
            advertise_ranges: true,
        },
    );

    let download_dir = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let manager = test_manager(state_dir.path(), state_dir.path().join("data")).await;

    let item = manager
        .add(url, HeaderList::new(), download_dir.path().to_path_buf())
        .await
        .expect("add");
    manager.run_one(&item.hash).await.expect("run_one");

    let item = manager.get_item(&item.hash).expect("item still registered");
    assert!(item.completed());
    let content = std::fs::read(&item.absolute_location).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn stop_mid_download_leaves_item_resumable_and_resume_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(4 * 1024 * 1024).collect();
    let url = common::range_server::start(body.clone());

    let download_dir = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let data_root = state_dir.path().join("data");
    let manager = test_manager(state_dir.path(), data_root.clone()).await;

    let item = manager
        .add(url.clone(), HeaderList::new(), download_dir.path().to_path_buf())
        .await
        .expect("add");
    let hash = item.hash.clone();

    // Stop the engine immediately so the run below observes a live part
    // mid-flight rather than a clean completion; exercises the "stopped"
    // shutdown path from `SPEC_FULL.md` §7 rather than asserting on a race.
    manager.stop(&hash);
    manager.run_one(&hash).await.expect("run_one after stop");

    let item = manager.get_item(&hash).expect("item still registered");
    assert!(!item.completed(), "a stopped download must not be marked completed");

    // A fresh process picks the item back up: prepare() restores the engine
    // from persisted parts and resumes it to completion.
    manager.update().await.expect("persist before resume");
    let resumed_item = manager.resume(&hash).await.expect("resume");
    manager.start_download(&resumed_item.hash).await.expect("start_download after resume");

    let item = manager.get_item(&hash).expect("item still registered");
    assert!(item.completed(), "resumed download should complete");
    assert_eq!(item.downloaded(), body.len() as u64);
    let content = std::fs::read(&item.absolute_location).unwrap();
    assert_eq!(content, body);
}

//! Owns the item registry, the live engine lookup table, and persistence.
//! See `SPEC_FULL.md` §4.6.
//!
//! Per §9's "cyclic ownership" design note: the `Item` never holds a
//! back-pointer to its engine. Instead the manager keeps a hash-keyed
//! registry of live engines; `Stop`/`Resume`/queue admission all go through
//! that table rather than through the item itself.

mod handlers;

use crate::config::DdmConfig;
use crate::content_length::ContentLength;
use crate::diskspace::check_disk_space;
use crate::engine::{self, Engine, EngineConfig, EngineHandlers, ProbeResult, ResumePart};
use crate::error::DdmError;
use crate::headers::HeaderList;
use crate::host_policy::HostPolicy;
use crate::item::{Item, ItemSnapshot};
use crate::queue::QueueHandlers;
use crate::resume_db::db::unix_timestamp;
use crate::resume_db::ResumeDb;
use crate::safe_resume::integrity::verify_resumable;
use crate::storage::{self, StorageWriter, StorageWriterBuilder};
use crate::url_model;
use crate::vmap::VMap;

use handlers::ManagerHandlers;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// What to do when the queue admits an item that is already registered but
/// not yet running: run its first pass or pick its resume up where it left off.
#[derive(Clone)]
enum Activation {
    Fresh(ProbeResult),
    Resumed(Vec<ResumePart>),
}

#[derive(Clone)]
struct EngineEntry {
    engine: Engine,
    activation: Activation,
}

/// On-disk representation of one item row: the item's serializable snapshot
/// plus its request headers (kept outside `ItemSnapshot` itself — headers are
/// a manager/persistence concern, not part of the item's own data model).
#[derive(Debug, Serialize, Deserialize)]
struct PersistedItem {
    snapshot: ItemSnapshot,
    headers: Vec<(String, String)>,
}

struct ManagerInner {
    items: VMap<String, Arc<Item>>,
    engines: VMap<String, EngineEntry>,
    db: ResumeDb,
    cfg: DdmConfig,
    /// Root of `<data_root>/<item.hash>/` scratch directories.
    data_root: PathBuf,
    handle: tokio::runtime::Handle,
    /// Per-host adaptive segment-count ladder (`SPEC_FULL.md` §4.11), shared
    /// by every item targeting the same host within this process.
    host_policy: Mutex<HostPolicy>,
}

impl ManagerInner {
    async fn persist_item(&self, item: &Item) -> Result<()> {
        let persisted = PersistedItem {
            snapshot: item.snapshot(),
            headers: item.headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        };
        let json = serde_json::to_string(&persisted)?;
        self.db.save_item(&item.hash, &json).await?;
        Ok(())
    }

    /// Best-effort, fire-and-forget persist for progress-driven events. Does
    /// not fsync (`SPEC_FULL.md` §4.6: "frequent progress-driven updates do
    /// not call fsync").
    fn schedule_persist_item(self: &Arc<Self>, item: Arc<Item>) {
        let inner = Arc::clone(self);
        self.handle.spawn(async move {
            if let Err(e) = inner.persist_item(&item).await {
                tracing::warn!(item = %item.hash, error = %e, "failed to persist item progress");
            }
        });
    }

    /// Persist followed by a WAL checkpoint — the durability point used for
    /// terminal events (`DownloadComplete`), matching the explicit
    /// `Flush`/`FlushOne`/`Close` fsync calls in the source.
    fn schedule_persist_item_fsync(self: &Arc<Self>, item: Arc<Item>) {
        let inner = Arc::clone(self);
        self.handle.spawn(async move {
            if let Err(e) = inner.persist_item(&item).await {
                tracing::error!(item = %item.hash, error = %e, "failed to persist completed item");
                return;
            }
            if let Err(e) = inner.db.checkpoint().await {
                tracing::warn!(error = %e, "wal checkpoint failed after completion persist");
            }
        });
    }

    fn on_item_finished(&self, hash: &str) {
        self.engines.remove(&hash.to_string());
    }

    fn host_policy_record_probe(&self, url: &str, accept_ranges: bool) {
        if let Err(e) = self.host_policy.lock().unwrap().record_probe_result(url, accept_ranges) {
            tracing::warn!(url, error = %e, "failed to record probe result in host policy");
        }
    }

    fn host_policy_record_error(&self, url: &str) {
        if let Err(e) = self.host_policy.lock().unwrap().record_error(url) {
            tracing::warn!(url, error = %e, "failed to record host error");
        }
    }

    fn host_policy_record_outcome(
        &self,
        url: &str,
        segment_count_used: usize,
        bytes_downloaded: u64,
        duration: std::time::Duration,
        throttle_events: u32,
        error_events: u32,
    ) {
        if error_events == 0 {
            if let Err(e) = self.host_policy.lock().unwrap().record_success(url) {
                tracing::warn!(url, error = %e, "failed to record host success");
            }
        }
        let outcome = self.host_policy.lock().unwrap().record_job_outcome(
            url,
            segment_count_used,
            bytes_downloaded,
            duration,
            throttle_events,
            error_events,
        );
        if let Err(e) = outcome {
            tracing::warn!(url, error = %e, "failed to record job outcome in host policy");
        }
    }

    /// Adaptive segment-count ceiling for a fresh `Engine`'s `max_parts`,
    /// clamped to the global bounds by `HostPolicy` itself.
    fn host_policy_max_parts(&self, url: &str, fallback: usize) -> usize {
        self.host_policy
            .lock()
            .unwrap()
            .adaptive_segment_count_for_url(url)
            .unwrap_or(fallback)
    }
}

/// Registry of in-flight and persisted downloads. Cheap to clone (a handle
/// around an `Arc`); every clone shares the same item/engine registries.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Opens the item database and loads every persisted item into memory.
    /// Decode errors for individual rows are logged and skipped, not fatal —
    /// mirrors the source's "non-EOF decode errors are logged but non-fatal"
    /// behavior for the whole-map case (`SPEC_FULL.md` §4.6 `init`).
    pub async fn init(cfg: DdmConfig, db: ResumeDb, data_root: PathBuf) -> Result<Self> {
        storage::create_scratch_dir(&data_root).context("failed to create scratch root")?;
        let host_policy = HostPolicy::default_path()
            .ok()
            .and_then(|path| HostPolicy::load_from_path(&path, cfg.min_segments, cfg.max_segments).ok().flatten())
            .unwrap_or_else(|| HostPolicy::new(cfg.min_segments, cfg.max_segments));
        let inner = Arc::new(ManagerInner {
            items: VMap::new(),
            engines: VMap::new(),
            db,
            cfg,
            data_root,
            handle: tokio::runtime::Handle::current(),
            host_policy: Mutex::new(host_policy),
        });
        let manager = Manager { inner };
        manager.load_items_from_disk().await?;
        Ok(manager)
    }

    async fn load_items_from_disk(&self) -> Result<()> {
        let rows = self.inner.db.load_items().await?;
        for (hash, json) in rows {
            match serde_json::from_str::<PersistedItem>(&json) {
                Ok(persisted) => {
                    let headers: HeaderList = persisted.headers.into_iter().collect();
                    let item = Item::from_snapshot(persisted.snapshot, headers);
                    self.inner.items.insert(hash, Arc::new(item));
                }
                Err(e) => {
                    tracing::error!(hash = %hash, error = %e, "failed to decode persisted item; skipping");
                }
            }
        }
        Ok(())
    }

    pub fn get_item(&self, hash: &str) -> Option<Arc<Item>> {
        self.inner.items.get(&hash.to_string())
    }

    pub fn list_items(&self) -> Vec<Arc<Item>> {
        self.inner.items.snapshot().into_iter().map(|(_, v)| v).collect()
    }

    fn fresh_hash(&self) -> String {
        loop {
            let bytes: [u8; 4] = rand::thread_rng().gen();
            let hash = hex::encode(bytes);
            if !self.inner.items.contains(&hash) {
                return hash;
            }
        }
    }

    /// Builds an `EngineConfig` whose `max_parts` is nudged by the per-host
    /// adaptive ladder (`SPEC_FULL.md` §4.11) instead of always using the
    /// configured ceiling.
    fn engine_config_for(&self, url: &str) -> EngineConfig {
        let max_parts = self.inner.host_policy_max_parts(url, self.inner.cfg.max_segments);
        EngineConfig {
            max_parts,
            max_connections: self.inner.cfg.max_connections_per_host,
            chunk_size: self.inner.cfg.default_chunk_size,
            ..EngineConfig::default()
        }
    }

    /// Persists the host policy cache to `path` (`SPEC_FULL.md` §4.11);
    /// called by the CLI after a run loop drains so tuning survives restarts.
    pub fn save_host_policy(&self, path: &std::path::Path) -> Result<()> {
        self.inner.host_policy.lock().unwrap().save_to_path(path)
    }

    /// Probes `url`, constructs an `Item` from the probed metadata, binds a
    /// fresh `Engine` whose handlers mutate that item, and registers both.
    /// Does not start the transfer — the caller (typically the queue
    /// manager's on-start callback) invokes `start_download` once admitted.
    pub async fn add(&self, url: String, custom_headers: HeaderList, download_dir: PathBuf) -> Result<Arc<Item>> {
        let chunk_size = self.inner.cfg.default_chunk_size;
        let probe_url = url.clone();
        let probe_headers = custom_headers.clone();
        let probe: ProbeResult = tokio::task::spawn_blocking(move || engine::probe::probe(&probe_url, &probe_headers, chunk_size))
            .await
            .context("probe task panicked")??;

        let filename = url_model::derive_filename(&url, probe.content_disposition.as_deref());
        let absolute_location = download_dir.join(&filename);
        check_disk_space(&download_dir, probe.content_length.unwrap_or(0))?;

        let hash = self.fresh_hash();
        let total_size = match probe.content_length {
            Some(n) => ContentLength::Known(n),
            None => ContentLength::Unknown,
        };
        let item = Arc::new(Item::new(
            hash.clone(),
            url.clone(),
            filename,
            custom_headers.clone(),
            unix_timestamp(),
            download_dir,
            absolute_location.clone(),
            total_size,
        ));

        self.inner.items.insert(hash.clone(), Arc::clone(&item));
        self.inner.persist_item(&item).await?;
        self.bind_fresh_engine(&item, url, custom_headers, probe).await?;

        Ok(item)
    }

    /// Builds a scratch dir, target file, and `Engine` for an item that has
    /// never downloaded any bytes, registering it as a `Fresh` activation.
    /// Shared by `add` (first-ever registration) and `prepare` (a later
    /// process picking up an item that was registered but never started).
    async fn bind_fresh_engine(
        &self,
        item: &Arc<Item>,
        url: String,
        headers: HeaderList,
        probe: ProbeResult,
    ) -> Result<()> {
        let hash = item.hash.clone();
        let scratch_dir = self.inner.data_root.join(&hash);
        storage::create_scratch_dir(&scratch_dir).context("failed to create item scratch directory")?;

        let temp_path = storage::temp_path(&item.absolute_location);
        let mut builder = StorageWriterBuilder::create(&temp_path)?;
        if let Some(size) = probe.content_length {
            builder.preallocate(size)?;
        }
        let writer = builder.build();

        self.inner.host_policy_record_probe(&url, probe.accept_ranges);

        let engine_handlers: Arc<dyn EngineHandlers> =
            Arc::new(ManagerHandlers::new(Arc::clone(item), Arc::clone(&self.inner)));
        let engine = Engine::new(url.clone(), headers, scratch_dir, writer, self.engine_config_for(&url), engine_handlers);

        self.inner
            .engines
            .insert(hash, EngineEntry { engine, activation: Activation::Fresh(probe) });
        Ok(())
    }

    /// Verifies on-disk integrity (`SPEC_FULL.md` §4.7) and binds a fresh
    /// `Engine` over the item's previously-persisted parts. Like `add`, this
    /// only registers the engine; the caller starts it.
    pub async fn resume(&self, hash: &str) -> Result<Arc<Item>> {
        let item = self
            .inner
            .items
            .get(&hash.to_string())
            .ok_or_else(|| DdmError::DownloadNotFound { hash: hash.to_string() })?;
        if !item.resumable() {
            return Err(DdmError::DownloadNotResumable { hash: hash.to_string() }.into());
        }

        let scratch_dir = self.inner.data_root.join(hash);
        verify_resumable(&item, &scratch_dir)?;

        let temp_path = storage::temp_path(&item.absolute_location);
        let writer = StorageWriter::open_existing(&temp_path)?;

        let resume_parts: Vec<ResumePart> = item
            .parts
            .snapshot()
            .into_iter()
            .map(|(initial_offset, part)| ResumePart {
                initial_offset,
                final_offset: part.final_offset,
                hash: part.hash.clone(),
                compiled: part.compiled,
            })
            .collect();

        let engine_handlers: Arc<dyn EngineHandlers> =
            Arc::new(ManagerHandlers::new(Arc::clone(&item), Arc::clone(&self.inner)));
        let engine = Engine::new(
            item.url.clone(),
            item.headers.clone(),
            scratch_dir,
            writer,
            self.engine_config_for(&item.url),
            engine_handlers,
        );

        self.inner.engines.insert(
            hash.to_string(),
            EngineEntry { engine, activation: Activation::Resumed(resume_parts) },
        );

        Ok(item)
    }

    /// Ensures `hash` has a live `Engine` registered, building one if the
    /// process just started (or a prior run exited) and none is bound yet.
    /// Idempotent: a no-op if an engine is already registered. The CLI calls
    /// this before `start_download` since each invocation is a fresh process
    /// with an empty in-memory engine registry.
    pub async fn prepare(&self, hash: &str) -> Result<Arc<Item>> {
        let item = self
            .inner
            .items
            .get(&hash.to_string())
            .ok_or_else(|| DdmError::DownloadNotFound { hash: hash.to_string() })?;

        if self.inner.engines.contains(&hash.to_string()) {
            return Ok(item);
        }
        if item.completed() {
            return Ok(item);
        }

        if item.parts.is_empty() {
            let chunk_size = self.inner.cfg.default_chunk_size;
            let url = item.url.clone();
            let headers = item.headers.clone();
            let probe_url = url.clone();
            let probe_headers = headers.clone();
            let probe: ProbeResult =
                tokio::task::spawn_blocking(move || engine::probe::probe(&probe_url, &probe_headers, chunk_size))
                    .await
                    .context("probe task panicked")??;
            self.bind_fresh_engine(&item, url, headers, probe).await?;
            Ok(item)
        } else {
            self.resume(hash).await
        }
    }

    /// `prepare` followed by `start_download`: the full "make this item
    /// runnable, then run it" sequence queue admission triggers.
    pub async fn run_one(&self, hash: &str) -> Result<()> {
        self.prepare(hash).await?;
        self.start_download(hash).await
    }

    /// Runs the registered engine's `start` or `resume` on a blocking thread,
    /// per the §5 async/blocking boundary, then — on a clean, non-stopped,
    /// non-failed finish — renames the scratch target into its final
    /// location. Called once admission (queue or direct caller) decides this
    /// item may run now.
    pub async fn start_download(&self, hash: &str) -> Result<()> {
        let entry = self
            .inner
            .engines
            .get(&hash.to_string())
            .ok_or_else(|| DdmError::DownloadNotFound { hash: hash.to_string() })?;
        let engine = entry.engine.clone();
        let final_path = self
            .inner
            .items
            .get(&hash.to_string())
            .map(|item| item.absolute_location.clone());

        tokio::task::spawn_blocking(move || match &entry.activation {
            Activation::Fresh(probe) => entry.engine.start(probe),
            Activation::Resumed(parts) => entry.engine.resume(parts),
        })
        .await
        .context("engine task panicked")?;

        if !engine.is_stopped() && !engine.failed() {
            if let Some(final_path) = final_path {
                engine
                    .finalize_target(&final_path)
                    .with_context(|| format!("failed to finalize completed download {hash}"))?;
            }
        }
        Ok(())
    }

    pub fn stop(&self, hash: &str) {
        if let Some(entry) = self.inner.engines.get(&hash.to_string()) {
            entry.engine.stop();
        }
    }

    pub fn is_downloading(&self, hash: &str) -> bool {
        self.inner.engines.contains(&hash.to_string())
    }

    /// Persists the whole item map in one transaction (`SPEC_FULL.md` §4.6
    /// `update`; the SQL substitute for buffer-first truncate+rewrite).
    pub async fn update(&self) -> Result<()> {
        let items = self.inner.items.snapshot();
        let mut rows = Vec::with_capacity(items.len());
        for (hash, item) in &items {
            let persisted = PersistedItem {
                snapshot: item.snapshot(),
                headers: item.headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            };
            rows.push((hash.clone(), serde_json::to_string(&persisted)?));
        }
        self.inner.db.save_items(&rows).await?;
        Ok(())
    }

    /// Drops every item with no live downloader whose progress is complete,
    /// removing its scratch directory, then persists and checkpoints.
    pub async fn flush(&self) -> Result<()> {
        for (hash, item) in self.inner.items.snapshot() {
            if self.inner.engines.contains(&hash) || !item.completed() {
                continue;
            }
            self.remove_scratch_dir(&hash).await?;
            self.inner.items.remove(&hash);
            self.inner.db.delete_item(&hash).await?;
        }
        self.inner.db.checkpoint().await?;
        Ok(())
    }

    /// Same as `flush` but for a single hash. Fails with `DownloadNotFound`
    /// if absent, or `FlushItemDownloading` if a downloader is still live.
    pub async fn flush_one(&self, hash: &str) -> Result<()> {
        if self.inner.items.get(&hash.to_string()).is_none() {
            return Err(DdmError::DownloadNotFound { hash: hash.to_string() }.into());
        }
        if self.inner.engines.contains(&hash.to_string()) {
            return Err(DdmError::FlushItemDownloading { hash: hash.to_string() }.into());
        }
        self.remove_scratch_dir(hash).await?;
        self.inner.items.remove(&hash.to_string());
        self.inner.db.delete_item(hash).await?;
        self.inner.db.checkpoint().await?;
        Ok(())
    }

    async fn remove_scratch_dir(&self, hash: &str) -> Result<()> {
        let scratch_dir = self.inner.data_root.join(hash);
        match tokio::fs::remove_dir_all(&scratch_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove scratch directory for {hash}")),
        }
    }

    /// Persist the queue manager's snapshot (`SPEC_FULL.md` §4.8 `get_state`/`load_state`).
    pub async fn save_queue_state(&self, state: &crate::queue::QueueState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.inner.db.save_queue_state(&json).await?;
        Ok(())
    }

    pub async fn load_queue_state(&self) -> Result<Option<crate::queue::QueueState>> {
        let Some(json) = self.inner.db.load_queue_state().await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Bridges the queue manager's on-start event to `start_download`, run
    /// detached on this manager's runtime handle (queue admission is
    /// synchronous; starting an engine is not).
    pub fn queue_handlers(&self) -> Arc<dyn QueueHandlers> {
        Arc::new(ManagerQueueHandlers { manager: self.clone() })
    }
}

struct ManagerQueueHandlers {
    manager: Manager,
}

impl QueueHandlers for ManagerQueueHandlers {
    fn on_start(&self, hash: &str) {
        let manager = self.manager.clone();
        let hash = hash.to_string();
        manager.inner.handle.clone().spawn(async move {
            if let Err(e) = manager.run_one(&hash).await {
                tracing::error!(hash = %hash, error = %e, "failed to start queued download");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DdmConfig;

    async fn test_manager() -> (tempfile::TempDir, Manager) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::resume_db::db::open_memory().await.unwrap();
        let data_root = dir.path().join("data");
        let manager = Manager::init(DdmConfig::default(), db, data_root).await.unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn init_on_empty_db_has_no_items() {
        let (_dir, manager) = test_manager().await;
        assert!(manager.list_items().is_empty());
    }

    #[tokio::test]
    async fn flush_one_missing_item_is_not_found() {
        let (_dir, manager) = test_manager().await;
        let err = manager.flush_one("ghost").await.unwrap_err();
        assert!(err.downcast_ref::<DdmError>().map_or(false, |e| matches!(e, DdmError::DownloadNotFound { .. })));
    }
}

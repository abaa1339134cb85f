//! `EngineHandlers` implementation that mutates one `Item` in response to
//! engine events, per `SPEC_FULL.md` §4.6/§4.9.
//!
//! The manager binds one of these per `Item` at `add`/`resume` time and hands
//! it to the engine as a boxed trait object — "patches the engine's handlers
//! so every Spawn/Respawn/Progress/CompileComplete/DownloadComplete event
//! mutates the Item and triggers a persist."

use crate::engine::EngineHandlers;
use crate::item::{Item, ItemPart};
use std::sync::Arc;
use std::time::Instant;

use super::ManagerInner;

pub(super) struct ManagerHandlers {
    item: Arc<Item>,
    inner: Arc<ManagerInner>,
    started: Instant,
}

impl ManagerHandlers {
    pub(super) fn new(item: Arc<Item>, inner: Arc<ManagerInner>) -> Self {
        ManagerHandlers { item, inner, started: Instant::now() }
    }

    /// Resolve `parent_hash` through the memPart reverse index and shrink its
    /// range to end just before `new_initial_offset` — used when a respawn or
    /// work-steal trims a parent part's tail. A hash that doesn't map back to
    /// a live part is a desynchronized part map, surfaced as `PartDesync`
    /// rather than silently doing nothing.
    fn shrink_parent(&self, parent_hash: &str, new_initial_offset: u64) {
        match self.item.mem_part_offset(parent_hash) {
            Ok(offset) => {
                self.item.parts.update(&offset, |p| {
                    p.final_offset = new_initial_offset.saturating_sub(1);
                });
            }
            Err(e) => {
                tracing::error!(item = %self.item.hash, parent_hash, error = %e, "part map desynchronized");
                self.on_error(0, e.to_string());
            }
        }
    }

    fn schedule_persist(&self) {
        self.inner.schedule_persist_item(Arc::clone(&self.item));
    }
}

impl EngineHandlers for ManagerHandlers {
    fn on_spawn_part(&self, hash: &str, initial_offset: u64, final_offset: u64) {
        match ItemPart::new(hash, initial_offset, final_offset) {
            Ok(part) => {
                self.item.parts.insert(initial_offset, part);
                self.schedule_persist();
            }
            Err(e) => {
                tracing::warn!(item = %self.item.hash, hash, error = %e, "spawned part has invalid range");
            }
        }
    }

    fn on_respawn_part(&self, parent_hash: &str, new_hash: &str, new_initial_offset: u64, new_final_offset: u64) {
        self.shrink_parent(parent_hash, new_initial_offset);
        self.on_spawn_part(new_hash, new_initial_offset, new_final_offset);
        tracing::debug!(item = %self.item.hash, parent_hash, new_hash, "respawned slow part");
    }

    fn on_progress(&self, _initial_offset: u64, bytes_this_tick: u64) {
        self.item.add_downloaded(bytes_this_tick);
    }

    fn on_compile_start(&self, hash: &str, initial_offset: u64) {
        tracing::debug!(item = %self.item.hash, hash, initial_offset, "compiling part into target");
    }

    fn on_compile_complete(&self, hash: &str, initial_offset: u64, _bytes_compiled: u64) {
        self.item.parts.update(&initial_offset, |p| p.compiled = true);
        tracing::debug!(item = %self.item.hash, hash, "part compiled");
        self.schedule_persist();
    }

    fn on_compile_skipped(&self, initial_offset: u64) {
        tracing::debug!(item = %self.item.hash, initial_offset, "compile skipped; already compiled on disk");
    }

    fn on_download_complete(&self) {
        self.item.mark_completed();
        self.inner.on_item_finished(&self.item.hash);
        self.inner.schedule_persist_item_fsync(Arc::clone(&self.item));
        self.inner.host_policy_record_outcome(
            &self.item.url,
            self.item.parts.snapshot().len().max(1),
            self.item.downloaded(),
            self.started.elapsed(),
            0,
            0,
        );
        tracing::info!(item = %self.item.hash, "download complete");
    }

    fn on_download_failed(&self) {
        self.inner.on_item_finished(&self.item.hash);
        self.inner.schedule_persist_item_fsync(Arc::clone(&self.item));
        self.inner.host_policy_record_outcome(
            &self.item.url,
            self.item.parts.snapshot().len().max(1),
            self.item.downloaded(),
            self.started.elapsed(),
            0,
            1,
        );
        tracing::warn!(item = %self.item.hash, "download failed: a part exhausted its retries");
    }

    fn on_error(&self, initial_offset: u64, message: String) {
        self.inner.host_policy_record_error(&self.item.url);
        tracing::error!(item = %self.item.hash, initial_offset, error = %message, "part failed");
    }

    fn on_retry(&self, initial_offset: u64, attempt: u32, max_attempts: u32, delay: std::time::Duration) {
        tracing::debug!(item = %self.item.hash, initial_offset, attempt, max_attempts, delay_ms = delay.as_millis() as u64, "retrying part");
    }

    fn on_retry_exhausted(&self, initial_offset: u64) {
        tracing::error!(item = %self.item.hash, initial_offset, "retries exhausted for part");
    }

    fn on_work_steal(&self, victim_hash: &str, new_hash: &str, new_initial_offset: u64) {
        self.shrink_parent(victim_hash, new_initial_offset);
        tracing::debug!(item = %self.item.hash, victim_hash, new_hash, new_initial_offset, "work-stole from slow part");
        self.schedule_persist();
    }

    fn on_resume_progress(&self, _initial_offset: u64, bytes_already_present: u64) {
        self.item.add_downloaded(bytes_already_present);
    }

    fn on_download_stopped(&self) {
        self.inner.on_item_finished(&self.item.hash);
        tracing::info!(item = %self.item.hash, "download stopped");
    }
}

//! Capability set for engine events (see `SPEC_FULL.md` §4.9).
//!
//! One trait with default no-op methods, rather than a struct of nullable
//! function-pointer fields: every engine is handed a `dyn EngineHandlers`,
//! never an `Option<Handler>`.

/// Events emitted by a running [`super::Engine`]. Implementors mutate their
/// own state (typically an `Item`) from these calls; they are invoked from
/// whichever worker thread observed the event and must not block on engine
/// internals.
pub trait EngineHandlers: Send + Sync {
    /// A new part started. `hash` is its scratch file name, needed by the
    /// manager to record a matching `ItemPart` in the item's part map.
    fn on_spawn_part(&self, _hash: &str, _initial_offset: u64, _final_offset: u64) {}
    fn on_respawn_part(&self, _parent_hash: &str, _new_hash: &str, _new_initial_offset: u64, _new_final_offset: u64) {}
    fn on_progress(&self, _initial_offset: u64, _bytes_this_tick: u64) {}
    fn on_compile_start(&self, _hash: &str, _initial_offset: u64) {}
    fn on_compile_complete(&self, _hash: &str, _initial_offset: u64, _bytes_compiled: u64) {}
    fn on_compile_skipped(&self, _initial_offset: u64) {}
    fn on_download_complete(&self) {}
    /// At least one part exhausted its retries and was abandoned; the
    /// transfer is incomplete. Distinct from `on_download_complete` so a
    /// manager never mistakes a partially-failed run for a finished one.
    fn on_download_failed(&self) {}
    fn on_error(&self, _initial_offset: u64, _message: String) {}
    fn on_retry(&self, _initial_offset: u64, _attempt: u32, _max_attempts: u32, _delay: std::time::Duration) {}
    fn on_retry_exhausted(&self, _initial_offset: u64) {}
    fn on_work_steal(&self, _victim_hash: &str, _new_hash: &str, _new_initial_offset: u64) {}
    fn on_resume_progress(&self, _initial_offset: u64, _bytes_already_present: u64) {}
    fn on_download_stopped(&self) {}
}

/// No-op handler set, useful for tests and the `bench` subcommand.
pub struct NullHandlers;
impl EngineHandlers for NullHandlers {}

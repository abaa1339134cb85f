//! Segmented download engine: the coordinator that turns one probed origin
//! into a set of `Part`s, respawns slow ones, steals work from idle ones, and
//! drives retry/redirect per part. See `SPEC_FULL.md` §4.2.
//!
//! One `Engine` per in-flight `Item`. The `Manager` (not yet wired here)
//! owns the `Item` <-> `Engine` lookup; this module knows nothing about
//! persistence or queueing.

pub mod active;
pub mod calibration;
pub mod handlers;
pub mod part;
pub mod probe;
pub mod slow;
pub mod steal;
mod wait_group;

pub use handlers::{EngineHandlers, NullHandlers};
pub use probe::ProbeResult;

use crate::headers::HeaderList;
use crate::redirect::RedirectPolicy;
use crate::retry::{classify, ErrorKind, RetryDecision, RetryPolicy, SegmentError};
use crate::storage::StorageWriter;
use active::{ActiveEntry, ActiveRegistry};
use calibration::{initial_part_count, initial_split};
use part::{DownloadOutcome, Part};
use slow::{decide as decide_slow, SlowAction, SlowPolicyInput};
use steal::should_attempt_steal;
use wait_group::WaitGroup;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sentinel `final_offset` meaning "unbounded" — used for the single-part,
/// non-resumable fallback when the origin's length isn't known up front.
pub const UNBOUNDED: u64 = u64::MAX;

/// Tunable knobs for one engine instance. Filled in from `DdmConfig` by the
/// caller; kept separate so tests can build an `Engine` without touching disk.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_parts: usize,
    pub max_connections: usize,
    pub chunk_size: u64,
    pub enable_work_stealing: bool,
    pub retry_policy: RetryPolicy,
    pub redirect_policy: RedirectPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parts: 16,
            max_connections: 16,
            chunk_size: 4 * 1024 * 1024,
            enable_work_stealing: true,
            retry_policy: RetryPolicy::default(),
            redirect_policy: RedirectPolicy::default(),
        }
    }
}

/// One persisted part handed back in on resume: its range, scratch hash, and
/// whether it had already been compiled into the target before the process
/// last stopped.
#[derive(Debug, Clone)]
pub struct ResumePart {
    pub initial_offset: u64,
    pub final_offset: u64,
    pub hash: String,
    pub compiled: bool,
}

struct EngineShared {
    url: String,
    headers: HeaderList,
    scratch_dir: PathBuf,
    target: StorageWriter,
    cfg: EngineConfig,
    handlers: Arc<dyn EngineHandlers>,
    stopped: Arc<AtomicBool>,
    failed: AtomicBool,
    current_parts: AtomicUsize,
    current_connections: AtomicUsize,
    active: ActiveRegistry,
    wg: WaitGroup,
}

/// Coordinates one segmented download from probe through completion. Cloning
/// an `Engine` is cheap (it's a handle to the shared state); every clone sees
/// the same active parts and the same stop flag.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn new(
        url: impl Into<String>,
        headers: HeaderList,
        scratch_dir: PathBuf,
        target: StorageWriter,
        cfg: EngineConfig,
        handlers: Arc<dyn EngineHandlers>,
    ) -> Self {
        Engine {
            shared: Arc::new(EngineShared {
                url: url.into(),
                headers,
                scratch_dir,
                target,
                cfg,
                handlers,
                stopped: Arc::new(AtomicBool::new(false)),
                failed: AtomicBool::new(false),
                current_parts: AtomicUsize::new(0),
                current_connections: AtomicUsize::new(0),
                active: ActiveRegistry::new(),
                wg: WaitGroup::new(),
            }),
        }
    }

    /// Signals every in-flight part to abandon its transfer at the next
    /// sample point. Does not block; call `wait` to block until they exit.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// True once at least one part has exhausted its retries. Only
    /// meaningful after `wait` returns.
    pub fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Flushes the target file and renames it from its `.part` scratch name
    /// to its final location. Only valid to call once `wait` has returned
    /// and `failed()`/`is_stopped()` are both false.
    pub fn finalize_target(&self, final_path: &std::path::Path) -> anyhow::Result<()> {
        self.shared.target.sync()?;
        self.shared.target.clone().finalize(final_path)?;
        Ok(())
    }

    /// Blocks until every spawned and respawned part has finished (completed,
    /// errored out of retries, or observed `stop`).
    pub fn wait(&self) {
        self.shared.wg.wait();
    }

    pub fn active_part_count(&self) -> usize {
        self.shared.active.len()
    }

    /// Issues the origin probe this engine will use to plan its initial
    /// parts. Callers typically run this on a blocking thread pool and feed
    /// the result into `start`.
    pub fn probe(&self) -> anyhow::Result<ProbeResult> {
        probe::probe(&self.shared.url, &self.shared.headers, self.shared.cfg.chunk_size)
    }

    /// Starts a fresh download, blocking the calling thread until every part
    /// finishes. Run this from a dedicated worker thread, not inline on an
    /// async executor.
    pub fn start(&self, probe: &ProbeResult) {
        let resumable = probe.accept_ranges && probe.content_length.is_some();
        let total_size = probe.content_length.unwrap_or(0);

        if !resumable || total_size == 0 {
            self.shared.spawn_single_part();
            self.finish_run();
            return;
        }

        let initial_parts = initial_part_count(probe.observed_bytes_per_sec, total_size, 1);
        let ranges = initial_split(total_size, initial_parts);
        let initial_bps = if probe.observed_bytes_per_sec > 0.0 {
            probe.observed_bytes_per_sec / initial_parts.max(1) as f64
        } else {
            1_000_000.0
        };

        for (start, end) in &ranges {
            if *end == *start {
                continue;
            }
            self.shared.spawn_part(*start, *end - 1, initial_bps);
        }

        self.finish_run();
    }

    /// Resumes a download from previously-persisted parts. Compiled parts are
    /// reported via `on_compile_skipped` and dropped; the rest restore their
    /// scratch file and re-enter the normal part loop.
    pub fn resume(&self, parts: &[ResumePart]) {
        let fallback_bps = 1_000_000.0;
        for p in parts {
            if p.compiled {
                self.shared.handlers.on_compile_skipped(p.initial_offset);
                continue;
            }
            match Part::restore(&self.shared.scratch_dir, &p.hash, p.initial_offset, p.final_offset) {
                Ok(part) => {
                    let bytes_present = part.bytes_read();
                    self.shared
                        .handlers
                        .on_resume_progress(p.initial_offset, bytes_present);
                    self.shared.run_owned(part, fallback_bps);
                }
                Err(e) => {
                    tracing::error!(hash = %p.hash, error = %e, "failed to restore scratch file on resume");
                    self.shared.handlers.on_error(p.initial_offset, e.to_string());
                    self.shared.failed.store(true, Ordering::SeqCst);
                }
            }
        }
        self.finish_run();
    }

    fn finish_run(&self) {
        self.shared.wg.wait();
        if self.shared.stopped.load(Ordering::Relaxed) {
            self.shared.handlers.on_download_stopped();
        } else if self.shared.failed.load(Ordering::Relaxed) {
            self.shared.handlers.on_download_failed();
        } else {
            self.shared.handlers.on_download_complete();
        }
    }
}

impl EngineShared {
    fn spawn_single_part(self: &Arc<Self>) {
        match Part::create(&self.scratch_dir, 0, UNBOUNDED) {
            Ok(mut part) => {
                // Never trips the slow-respawn path: there is nothing to
                // split a single, boundary-less part into.
                part.set_expected_speed(f64::MAX / 2.0);
                self.handlers.on_spawn_part(&part.hash, 0, UNBOUNDED);
                self.run_owned(part, 0.0);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to create scratch file for single part");
                self.handlers.on_error(0, e.to_string());
                self.failed.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Creates and spawns a fresh part, returning its hash (empty if scratch
    /// file creation failed) so callers that need to report it — work-steal
    /// and slow-respawn — don't have to reach back into the part.
    fn spawn_part(self: &Arc<Self>, initial_offset: u64, final_offset: u64, initial_bps: f64) -> String {
        match Part::create(&self.scratch_dir, initial_offset, final_offset) {
            Ok(mut part) => {
                part.set_expected_speed(initial_bps);
                let hash = part.hash.clone();
                self.handlers.on_spawn_part(&hash, initial_offset, final_offset);
                self.run_owned(part, initial_bps);
                hash
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to create scratch file");
                self.handlers.on_error(initial_offset, e.to_string());
                self.failed.store(true, Ordering::SeqCst);
                String::new()
            }
        }
    }

    fn run_owned(self: &Arc<Self>, mut part: Part, initial_bps: f64) {
        if initial_bps > 0.0 {
            part.set_expected_speed(initial_bps);
        }
        let hash = part.hash.clone();
        let entry = Arc::new(ActiveEntry::new(
            part.initial_offset,
            part.boundary_handle(),
            part.bytes_read_handle(),
        ));
        self.active.insert(hash, entry);
        self.current_parts.fetch_add(1, Ordering::SeqCst);
        self.current_connections.fetch_add(1, Ordering::SeqCst);
        self.wg.add(1);

        let shared = Arc::clone(self);
        std::thread::spawn(move || part_loop(shared, part));
    }

    fn finish_part(self: &Arc<Self>, hash: &str, mut part: Part, started: Instant) {
        let initial_offset = part.initial_offset;
        self.handlers.on_compile_start(hash, initial_offset);
        let bytes_total = part.bytes_read();
        let elapsed = started.elapsed();

        match part.compile(&self.target) {
            Ok((_read, written)) => {
                let scratch_path = self.scratch_dir.join(&part.hash);
                part.close();
                if let Err(e) = std::fs::remove_file(&scratch_path) {
                    tracing::warn!(path = %scratch_path.display(), error = %e, "failed to remove scratch file after compile");
                }
                self.handlers.on_compile_complete(hash, initial_offset, written);
            }
            Err(e) => {
                tracing::error!(hash = %hash, error = %e, "compile into target failed");
                self.handlers.on_error(initial_offset, e.to_string());
                self.failed.store(true, Ordering::SeqCst);
            }
        }

        self.active.remove(hash);
        self.current_parts.fetch_sub(1, Ordering::SeqCst);
        self.current_connections.fetch_sub(1, Ordering::SeqCst);

        if self.cfg.enable_work_stealing && !self.stopped.load(Ordering::Relaxed) {
            let achieved_bps = if elapsed.as_secs_f64() > 0.0 {
                bytes_total as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            };
            if should_attempt_steal(achieved_bps)
                && self.current_connections.load(Ordering::SeqCst) < self.cfg.max_connections
                && self.current_parts.load(Ordering::SeqCst) < self.cfg.max_parts
            {
                self.try_steal(hash);
            }
        }

        self.wg.done();
    }

    fn abandon_part(self: &Arc<Self>, hash: &str) {
        self.active.remove(hash);
        self.current_parts.fetch_sub(1, Ordering::SeqCst);
        self.current_connections.fetch_sub(1, Ordering::SeqCst);
        self.wg.done();
    }

    /// Picks the busiest still-active part and shrinks its boundary in half,
    /// spawning a new part for the freed tail. See `SPEC_FULL.md` §4.2
    /// work-stealing.
    fn try_steal(self: &Arc<Self>, exclude_hash: &str) {
        let Some((victim_hash, entry)) = self.active.pick_victim(exclude_hash) else {
            return;
        };
        let _guard = entry.steal_lock.lock().unwrap();
        if entry.already_stolen.load(Ordering::SeqCst) {
            return;
        }
        let pos = entry.initial_offset + entry.bytes_read.load(Ordering::SeqCst);
        let old_boundary = entry.boundary.load(Ordering::SeqCst);
        if old_boundary <= pos {
            return;
        }
        let remaining = old_boundary - pos;
        let midpoint = pos + remaining / 2;
        if midpoint >= old_boundary {
            return;
        }

        entry.boundary.store(midpoint, Ordering::SeqCst);
        entry.already_stolen.store(true, Ordering::SeqCst);

        let new_initial = midpoint + 1;
        let new_hash = self.spawn_part(new_initial, old_boundary, steal::STEAL_SPEED_THRESHOLD / 2.0);
        if !new_hash.is_empty() {
            self.handlers.on_work_steal(&victim_hash, &new_hash, new_initial);
        }
    }
}

/// Body of one part's worker thread: downloads until completion, stop, or
/// exhausted retries, consulting the slow policy on every `Slow` outcome and
/// the retry policy on every `Error` outcome.
fn part_loop(shared: Arc<EngineShared>, mut part: Part) {
    let hash = part.hash.clone();
    let started = Instant::now();
    let mut force_no_slow_check = false;
    let mut attempt: u32 = 1;
    let mut last_reported = part.bytes_read();

    loop {
        if shared.stopped.load(Ordering::Relaxed) {
            shared.abandon_part(&hash);
            return;
        }

        let outcome = part.download(
            &shared.url,
            &shared.headers,
            &shared.cfg.redirect_policy,
            &shared.stopped,
            force_no_slow_check,
        );

        let bytes_read = part.bytes_read();
        if bytes_read > last_reported {
            shared
                .handlers
                .on_progress(part.initial_offset, bytes_read - last_reported);
            last_reported = bytes_read;
        }

        match outcome {
            DownloadOutcome::Completed => {
                shared.finish_part(&hash, part, started);
                return;
            }
            DownloadOutcome::Stopped => {
                shared.abandon_part(&hash);
                return;
            }
            DownloadOutcome::Slow { .. } => {
                let input = SlowPolicyInput {
                    current_offset: part.initial_offset + part.bytes_read(),
                    final_offset: part.final_offset(),
                    current_parts: shared.current_parts.load(Ordering::SeqCst),
                    max_parts: shared.cfg.max_parts,
                    current_connections: shared.current_connections.load(Ordering::SeqCst),
                    max_connections: shared.cfg.max_connections,
                };
                match decide_slow(input) {
                    SlowAction::ForceContinue => {
                        force_no_slow_check = true;
                    }
                    SlowAction::ContinueRepeated => {
                        // Budget exhausted for now; keep going and re-check next sample.
                    }
                    SlowAction::Respawn { split_at } => {
                        let old_final = part.final_offset();
                        part.set_final_offset(split_at);
                        let tail_start = split_at + 1;
                        if tail_start <= old_final {
                            let tail_bps = part.expected_speed_bytes_per_sec() / 2.0;
                            // `spawn_part` itself fires `on_spawn_part` for the new
                            // tail (the manager uses that to record its ItemPart);
                            // `on_respawn_part` additionally ties it back to the
                            // slow parent for logging/UI.
                            let new_hash = shared.spawn_part(tail_start, old_final, tail_bps.max(1.0));
                            if !new_hash.is_empty() {
                                shared
                                    .handlers
                                    .on_respawn_part(&hash, &new_hash, tail_start, old_final);
                            }
                        }
                        part.halve_expected_speed();
                    }
                }
            }
            DownloadOutcome::Error(e) => {
                if let Some(entry) = shared.active.get(&hash) {
                    entry.retry_attempts.store(attempt, Ordering::SeqCst);
                }
                let kind = classify(&e);
                match shared.cfg.retry_policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => {
                        shared.handlers.on_retry_exhausted(part.initial_offset);
                        let message = crate::error::DdmError::try_from(&e)
                            .map(|named| named.to_string())
                            .unwrap_or_else(|_| e.to_string());
                        shared.handlers.on_error(part.initial_offset, message);
                        shared.failed.store(true, Ordering::SeqCst);
                        shared.abandon_part(&hash);
                        return;
                    }
                    RetryDecision::RetryAfter(delay) => {
                        shared.handlers.on_retry(
                            part.initial_offset,
                            attempt,
                            shared.cfg.retry_policy.max_attempts,
                            delay,
                        );
                        if cancellable_sleep(&shared.stopped, delay) {
                            shared.abandon_part(&hash);
                            return;
                        }
                        attempt += 1;
                        if let Some(entry) = shared.active.get(&hash) {
                            entry.retry_attempts.store(0, Ordering::SeqCst);
                        }
                    }
                }
            }
        }
    }
}

/// Sleeps in short increments so a `stop()` mid-backoff takes effect promptly
/// instead of after the full delay. Returns `true` if the stop flag fired.
fn cancellable_sleep(stopped: &AtomicBool, total: Duration) -> bool {
    let step = Duration::from_millis(100);
    let mut remaining = total;
    loop {
        if stopped.load(Ordering::Relaxed) {
            return true;
        }
        if remaining.is_zero() {
            return false;
        }
        let sleep_for = remaining.min(step);
        std::thread::sleep(sleep_for);
        remaining -= sleep_for;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageWriterBuilder;

    fn test_engine(total_size: u64) -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        let target_path = dir.path().join("target.part");
        let mut builder = StorageWriterBuilder::create(&target_path).unwrap();
        builder.preallocate(total_size).unwrap();
        let writer = builder.build();
        let engine = Engine::new(
            "http://example.invalid/file".to_string(),
            HeaderList::new(),
            scratch_dir,
            writer,
            EngineConfig::default(),
            Arc::new(NullHandlers),
        );
        (dir, engine)
    }

    #[test]
    fn new_engine_has_no_active_parts() {
        let (_dir, engine) = test_engine(1024);
        assert_eq!(engine.active_part_count(), 0);
        assert!(!engine.is_stopped());
    }

    #[test]
    fn stop_is_observable_immediately() {
        let (_dir, engine) = test_engine(1024);
        engine.stop();
        assert!(engine.is_stopped());
    }

    #[test]
    fn wait_returns_immediately_with_no_parts_spawned() {
        let (_dir, engine) = test_engine(1024);
        engine.wait();
    }

    #[test]
    fn cancellable_sleep_returns_true_when_already_stopped() {
        let stopped = AtomicBool::new(true);
        assert!(cancellable_sleep(&stopped, Duration::from_secs(5)));
    }

    #[test]
    fn cancellable_sleep_runs_full_delay_when_not_stopped() {
        let stopped = AtomicBool::new(false);
        let start = Instant::now();
        assert!(!cancellable_sleep(&stopped, Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}

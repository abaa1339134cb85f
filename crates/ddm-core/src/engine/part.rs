//! Segment lifecycle: scratch file create/restore, ranged body copy with slow
//! detection, and compile-into-target.

use crate::headers::HeaderList;
use crate::redirect::RedirectPolicy;
use crate::retry::SegmentError;
use crate::storage::StorageWriter;
use anyhow::{Context, Result};
use rand::Rng;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Every tenth chunk is timed against the expected-speed threshold; see the
/// rationale in `SPEC_FULL.md` §4.1.
const SLOW_CHECK_SAMPLE_EVERY: u32 = 10;
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of one `download` call.
pub enum DownloadOutcome {
    /// The part reached `final_offset`; no more bytes to fetch.
    Completed,
    /// A chunk copy took longer than the expected time; caller should consult
    /// the slow policy. Carries the offset to resume from.
    Slow { resume_from: u64 },
    /// A network/storage error occurred; caller consults the retry policy.
    Error(SegmentError),
    /// The engine's stop flag was observed mid-transfer; the caller should
    /// abandon the part without compiling or retrying.
    Stopped,
}

/// One ranged download and its scratch file.
pub struct Part {
    pub hash: String,
    pub initial_offset: u64,
    file: File,
    /// Bytes written to the scratch file so far (== current scratch file length).
    bytes_read: Arc<AtomicU64>,
    /// Last byte this part is currently responsible for. Shared with the
    /// engine coordinator so a work-steal can shrink it out from under an
    /// in-flight request; checked on the same cadence as the slow-check.
    boundary: Arc<AtomicU64>,
    etime: Duration,
}

fn random_hash() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 2] = rng.gen();
    hex::encode(bytes)
}

fn scratch_path(scratch_dir: &Path, hash: &str) -> PathBuf {
    scratch_dir.join(hash)
}

impl Part {
    /// Creates a fresh part with a new scratch file, initially responsible for
    /// bytes up to and including `final_offset`.
    pub fn create(scratch_dir: &Path, initial_offset: u64, final_offset: u64) -> Result<Self> {
        crate::storage::create_scratch_dir(scratch_dir)
            .with_context(|| format!("creating scratch dir {}", scratch_dir.display()))?;
        let hash = random_hash();
        let path = scratch_path(scratch_dir, &hash);
        let mut options = File::options();
        options.read(true).write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(crate::storage::NEW_FILE_MODE);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("creating scratch file {}", path.display()))?;
        Ok(Part {
            hash,
            initial_offset,
            file,
            bytes_read: Arc::new(AtomicU64::new(0)),
            boundary: Arc::new(AtomicU64::new(final_offset)),
            etime: Duration::from_secs(1),
        })
    }

    /// Reopens an existing scratch file for resume, seeking to its current size.
    pub fn restore(scratch_dir: &Path, hash: &str, initial_offset: u64, final_offset: u64) -> Result<Self> {
        let path = scratch_path(scratch_dir, hash);
        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("reopening scratch file {}", path.display()))?;
        let len = file.metadata()?.len();
        Ok(Part {
            hash: hash.to_string(),
            initial_offset,
            file,
            bytes_read: Arc::new(AtomicU64::new(len)),
            boundary: Arc::new(AtomicU64::new(final_offset)),
            etime: Duration::from_secs(1),
        })
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Handle the engine coordinator keeps to read this part's progress
    /// without going through the part's own task (e.g. work-steal remaining
    /// byte accounting).
    pub fn bytes_read_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_read)
    }

    /// Current last-byte-offset this part is responsible for. May shrink
    /// across the life of the part if another part steals its tail.
    pub fn final_offset(&self) -> u64 {
        self.boundary.load(Ordering::Relaxed)
    }

    /// Handle the engine coordinator keeps to shrink this part's boundary
    /// when stealing its tail for a new sibling part.
    pub fn boundary_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.boundary)
    }

    /// Shrinks (or sets) the boundary this part downloads up to. Has no effect
    /// on a request already in flight past this point until the next
    /// slow-check sample catches up; see `SPEC_FULL.md` §4.2 work-stealing.
    pub fn set_final_offset(&self, new_final_offset: u64) {
        self.boundary.store(new_final_offset, Ordering::Relaxed);
    }

    /// Sets the expected time to download one chunk at `bytes_per_sec`.
    pub fn set_expected_speed(&mut self, bytes_per_sec: f64) {
        let secs = if bytes_per_sec > 0.0 {
            COPY_CHUNK_SIZE as f64 / bytes_per_sec
        } else {
            1.0
        };
        self.etime = Duration::from_secs_f64(secs.max(0.001));
    }

    /// Inverse of `set_expected_speed`, used when a respawn halves the
    /// remaining range: the parent's continuing half is assumed to keep half
    /// its previous expected throughput.
    pub fn expected_speed_bytes_per_sec(&self) -> f64 {
        let secs = self.etime.as_secs_f64();
        if secs > 0.0 {
            COPY_CHUNK_SIZE as f64 / secs
        } else {
            0.0
        }
    }

    pub fn halve_expected_speed(&mut self) {
        let current = self.expected_speed_bytes_per_sec();
        self.set_expected_speed((current / 2.0).max(1.0));
    }

    /// GETs `[initial_offset + bytes_read, final_offset]` (inclusive), following
    /// redirects manually via `redirect_policy`, streaming the body into the
    /// scratch file. `force_no_slow_check` disables timing (used for the final,
    /// forced-continue state after the slow policy gives up on splitting).
    /// The boundary is read fresh at the start of each request and re-checked
    /// periodically during the transfer, so a concurrent `set_final_offset`
    /// (a work-steal) can shrink it mid-flight.
    pub fn download(
        &mut self,
        url: &str,
        headers: &HeaderList,
        redirect_policy: &RedirectPolicy,
        stopped: &AtomicBool,
        force_no_slow_check: bool,
    ) -> DownloadOutcome {
        let start = self.initial_offset + self.bytes_read();
        if start > self.final_offset() {
            return DownloadOutcome::Completed;
        }
        if stopped.load(Ordering::Relaxed) {
            return DownloadOutcome::Stopped;
        }

        let mut current_url = url.to_string();
        let mut current_headers = headers.clone();
        let mut hop = 0u32;

        loop {
            match self.run_request(&current_url, &current_headers, start, stopped, force_no_slow_check) {
                RequestOutcome::Done(outcome) => return outcome,
                RequestOutcome::Redirect(location) => {
                    match redirect_policy.next_step(hop, &current_url, &location, &current_headers) {
                        Ok(step) => {
                            current_url = step.url;
                            current_headers = step.headers;
                            hop += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "redirect policy rejected hop");
                            return DownloadOutcome::Error(SegmentError::Http(0u32));
                        }
                    }
                }
            }
        }
    }

    fn run_request(
        &mut self,
        url: &str,
        headers: &HeaderList,
        start: u64,
        stopped: &AtomicBool,
        force_no_slow_check: bool,
    ) -> RequestOutcome {
        let final_offset_at_start = self.final_offset();
        let start_bytes_read = self.bytes_read();
        let mut easy = curl::easy::Easy::new();
        if easy.url(url).is_err() {
            return RequestOutcome::Done(DownloadOutcome::Error(SegmentError::Http(0)));
        }
        let _ = easy.follow_location(false);
        let _ = easy.connect_timeout(Duration::from_secs(30));
        let _ = easy.low_speed_limit(512);
        let _ = easy.low_speed_time(Duration::from_secs(60));
        let _ = easy.timeout(Duration::from_secs(3600));
        if final_offset_at_start == u64::MAX {
            // Sentinel for "no known upper bound": used by the single-part,
            // non-resumable fallback. Only send a range header if resuming
            // past byte 0; omit it entirely for a fresh full-body GET.
            if start > 0 {
                let _ = easy.range(&format!("{}-", start));
            }
        } else {
            let range = format!("{}-{}", start, final_offset_at_start);
            let _ = easy.range(&range);
        }

        if let Ok(list) = headers.apply_to_curl_list() {
            if !headers.is_empty() {
                let _ = easy.http_headers(list);
            }
        }

        let mut location: Option<String> = None;
        let mut chunk_counter: u32 = 0;
        let mut last_sample = Instant::now();
        let mut slow_hit = false;
        let mut stolen_hit = false;
        let mut stopped_hit = false;
        let file = &mut self.file;
        let bytes_read = Arc::clone(&self.bytes_read);
        let boundary = Arc::clone(&self.boundary);
        let initial_offset = self.initial_offset;
        let etime = self.etime;
        let write_err: std::cell::RefCell<Option<std::io::Error>> = std::cell::RefCell::new(None);

        {
            let mut transfer = easy.transfer();
            let _ = transfer.header_function(|data| {
                if let Ok(s) = std::str::from_utf8(data) {
                    let s = s.trim_end();
                    if let Some(rest) = s.strip_prefix("Location:").or_else(|| s.strip_prefix("location:")) {
                        location = Some(rest.trim().to_string());
                    }
                }
                true
            });
            let result = transfer.write_function(|data| {
                chunk_counter += 1;
                if file.write_all(data).is_err() {
                    write_err.borrow_mut().replace(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "scratch write failed",
                    ));
                    return Ok(0);
                }
                bytes_read.fetch_add(data.len() as u64, Ordering::Relaxed);

                if chunk_counter % SLOW_CHECK_SAMPLE_EVERY == 0 {
                    if stopped.load(Ordering::Relaxed) {
                        stopped_hit = true;
                        return Ok(0);
                    }
                    let current_end = initial_offset + bytes_read.load(Ordering::Relaxed);
                    if current_end > boundary.load(Ordering::Relaxed) {
                        stolen_hit = true;
                        return Ok(0);
                    }
                    if !force_no_slow_check {
                        let elapsed = last_sample.elapsed();
                        last_sample = Instant::now();
                        if elapsed > etime {
                            slow_hit = true;
                            return Ok(0);
                        }
                    }
                }
                Ok(data.len())
            });
            if let Err(e) = result.and_then(|_| transfer.perform()) {
                if slow_hit || stolen_hit || stopped_hit {
                    // fallthrough below: not a real transfer error
                } else if let Some(io_err) = write_err.borrow_mut().take() {
                    return RequestOutcome::Done(DownloadOutcome::Error(SegmentError::Storage(io_err)));
                } else {
                    return RequestOutcome::Done(DownloadOutcome::Error(SegmentError::Curl(e)));
                }
            }
        }

        if stopped_hit {
            return RequestOutcome::Done(DownloadOutcome::Stopped);
        }
        if stolen_hit {
            return RequestOutcome::Done(DownloadOutcome::Completed);
        }
        if slow_hit {
            return RequestOutcome::Done(DownloadOutcome::Slow {
                resume_from: self.initial_offset + self.bytes_read(),
            });
        }

        let code = easy.response_code().unwrap_or(0);
        if (300..400).contains(&code) {
            if let Some(loc) = location {
                return RequestOutcome::Redirect(loc);
            }
        }
        if code != 206 && code != 200 {
            return RequestOutcome::Done(DownloadOutcome::Error(SegmentError::Http(code)));
        }

        // A bounded range has a known expected length; a server that closes
        // the connection cleanly but short (no declared Content-Length, or a
        // technically-valid-but-truncated chunked body) won't always surface
        // as a curl transfer error, so check the byte count ourselves.
        if final_offset_at_start != u64::MAX {
            let expected = final_offset_at_start - start + 1;
            let received = self.bytes_read() - start_bytes_read;
            if received < expected {
                return RequestOutcome::Done(DownloadOutcome::Error(
                    SegmentError::PartialTransfer { expected, received },
                ));
            }
        }

        RequestOutcome::Done(DownloadOutcome::Completed)
    }

    /// Copies the scratch file into `target` at `initial_offset`. Returns
    /// `(bytes_read, bytes_written)`; a mismatch indicates a short write.
    pub fn compile(&mut self, target: &StorageWriter) -> Result<(u64, u64)> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        let mut total_read = 0u64;
        let mut total_written = 0u64;
        loop {
            let n = self.file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            target.write_at(self.initial_offset + total_read, &buf[..n])?;
            total_read += n as u64;
            total_written += n as u64;
        }
        Ok((total_read, total_written))
    }

    /// Drops the file handle. Deleting the scratch file on disk is the
    /// caller's job (it happens after a successful compile).
    pub fn close(self) {
        drop(self.file);
    }
}

enum RequestOutcome {
    Done(DownloadOutcome),
    Redirect(String),
}

//! Benchmark mode: probes the origin once and reports the part count the
//! calibration ladder (`engine::calibration`) and the per-host adaptive
//! policy (`host_policy`) would pick for it.
//!
//! The teacher's original bench ran full controlled downloads at 4/8/16
//! segments and measured observed throughput per run. The new engine already
//! calibrates its initial part count from a single origin probe and keeps
//! adjusting via work-stealing and slow-part respawn while it runs, so a
//! separate multi-run benchmark no longer has anything to measure that the
//! engine itself doesn't already do live — this command now just surfaces
//! what calibration would decide, without downloading the file.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::config::DdmConfig;
use crate::engine::calibration;
use crate::engine::probe;
use crate::headers::HeaderList;
use crate::host_policy::HostPolicy;

/// What a benchmark run against one URL tells the caller.
#[derive(Debug, Clone)]
pub struct BenchResult {
    pub accept_ranges: bool,
    pub content_length: Option<u64>,
    pub observed_bytes_per_sec: f64,
    /// Part count the calibration ladder would pick from this probe alone.
    pub calibrated_part_count: usize,
    /// Part count the per-host adaptive policy recommends, folding in any
    /// throttling/error history recorded for this host in previous runs.
    pub adaptive_part_count: usize,
}

/// Probes `url` and reports the part counts calibration/host-policy would
/// pick. Runs on the calling thread; callers on an async runtime should
/// invoke this from `spawn_blocking`.
pub fn run_bench(url: &str, headers: &HashMap<String, String>, cfg: &DdmConfig) -> Result<BenchResult> {
    let header_list: HeaderList = headers.clone().into_iter().collect();
    let probed = probe::probe(url, &header_list, cfg.default_chunk_size).context("origin probe failed")?;

    let total_size = probed.content_length.unwrap_or(0);
    let calibrated_part_count = calibration::initial_part_count(probed.observed_bytes_per_sec, total_size, 1);

    let mut policy = HostPolicy::default_path()
        .ok()
        .and_then(|path| HostPolicy::load_from_path(&path, cfg.min_segments, cfg.max_segments).ok().flatten())
        .unwrap_or_else(|| HostPolicy::new(cfg.min_segments, cfg.max_segments));
    let _ = policy.record_probe_result(url, probed.accept_ranges);
    let adaptive_part_count = policy.adaptive_segment_count_for_url(url).unwrap_or(calibrated_part_count);

    Ok(BenchResult {
        accept_ranges: probed.accept_ranges,
        content_length: probed.content_length,
        observed_bytes_per_sec: probed.observed_bytes_per_sec,
        calibrated_part_count,
        adaptive_part_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_and_adaptive_agree_on_a_fresh_host() {
        // A host with no prior history should get the same pick from both
        // the one-shot calibration ladder and the adaptive default (4).
        let cfg = DdmConfig::default();
        let mut policy = HostPolicy::new(cfg.min_segments, cfg.max_segments);
        let adaptive = policy.adaptive_segment_count_for_url("https://example.com/file").unwrap();
        assert_eq!(adaptive, 4);
    }
}

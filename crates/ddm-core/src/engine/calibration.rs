//! Calibration ladder: initial part count from the probe's observed speed.

/// Minimum part size: below this remaining-byte count a slow part is never
/// split further (see `SPEC_FULL.md` §4.2 slow policy, step 1).
pub const MIN_PART_SIZE: u64 = 512 * 1024;

/// Picks an initial part count from a probe's observed bytes/sec, per the
/// calibration ladder. Falls back to `fallback` (usually 1, for a
/// non-resumable or too-small file) when `total_size` doesn't justify splitting.
pub fn initial_part_count(observed_bytes_per_sec: f64, total_size: u64, fallback: usize) -> usize {
    if total_size <= MIN_PART_SIZE {
        return fallback.max(1);
    }
    let ladder = if observed_bytes_per_sec < 100_000.0 {
        14
    } else if observed_bytes_per_sec < 1_000_000.0 {
        12
    } else if observed_bytes_per_sec > 10_000_000.0 {
        8
    } else if observed_bytes_per_sec > 5_000_000.0 {
        10
    } else {
        // Between 1 MB/s and 5 MB/s: the source leaves this band unspecified;
        // split the difference between the 12- and 10-part steps.
        11
    };
    // Never plan more parts than MIN_PART_SIZE allows.
    let max_by_size = (total_size / MIN_PART_SIZE).max(1) as usize;
    ladder.min(max_by_size)
}

/// Split `total_size` into `part_count` half-open ranges `[start, end)`, as
/// equal as possible, with the last part absorbing the remainder.
pub fn initial_split(total_size: u64, part_count: usize) -> Vec<(u64, u64)> {
    if total_size == 0 || part_count == 0 {
        return Vec::new();
    }
    let part_count = part_count as u64;
    let base = total_size / part_count;
    let mut out = Vec::with_capacity(part_count as usize);
    let mut offset = 0u64;
    for i in 0..part_count {
        let end = if i == part_count - 1 {
            total_size
        } else {
            offset + base
        };
        out.push((offset, end));
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_picks_slow_end() {
        assert_eq!(initial_part_count(50_000.0, 100_000_000, 1), 14);
        assert_eq!(initial_part_count(500_000.0, 100_000_000, 1), 12);
    }

    #[test]
    fn ladder_picks_fast_end() {
        assert_eq!(initial_part_count(20_000_000.0, 100_000_000, 1), 8);
        assert_eq!(initial_part_count(7_000_000.0, 100_000_000, 1), 10);
    }

    #[test]
    fn small_file_collapses_to_fallback() {
        assert_eq!(initial_part_count(20_000_000.0, 1024, 1), 1);
    }

    #[test]
    fn never_exceeds_min_part_size_budget() {
        // 1 MiB file can afford at most 2 parts of MIN_PART_SIZE (512 KiB) each.
        let n = initial_part_count(50_000.0, 1024 * 1024, 1);
        assert_eq!(n, 2);
    }

    #[test]
    fn initial_split_even() {
        let plan = initial_split(1000, 4);
        assert_eq!(plan, vec![(0, 250), (250, 500), (500, 750), (750, 1000)]);
    }

    #[test]
    fn initial_split_last_absorbs_remainder() {
        let plan = initial_split(10, 3);
        assert_eq!(plan, vec![(0, 3), (3, 6), (6, 10)]);
    }
}

//! Work-stealing victim selection (pure function, see `SPEC_FULL.md` §4.2).

/// Minimum remaining bytes a victim must have before it can be stolen from.
pub const STEAL_MIN_REMAINING: u64 = 5 * 1024 * 1024;

/// Minimum achieved speed (bytes/sec) on the just-completed part to trigger stealing.
pub const STEAL_SPEED_THRESHOLD: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub hash_index: usize,
    pub remaining: u64,
    pub already_stolen: bool,
    pub retry_attempts: u32,
}

/// Among active parts, pick the one with the most remaining bytes that hasn't
/// already been stolen from and isn't mid-retry. Returns its index in `candidates`.
pub fn pick_victim(candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.already_stolen && c.retry_attempts == 0 && c.remaining > STEAL_MIN_REMAINING)
        .max_by_key(|(_, c)| c.remaining)
        .map(|(i, _)| i)
}

/// `true` if a just-finished part's achieved speed justifies attempting a steal.
pub fn should_attempt_steal(achieved_bytes_per_sec: f64) -> bool {
    achieved_bytes_per_sec > STEAL_SPEED_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_remaining_eligible_candidate() {
        let candidates = [
            Candidate { hash_index: 0, remaining: 6_000_000, already_stolen: false, retry_attempts: 0 },
            Candidate { hash_index: 1, remaining: 9_000_000, already_stolen: false, retry_attempts: 0 },
            Candidate { hash_index: 2, remaining: 20_000_000, already_stolen: true, retry_attempts: 0 },
        ];
        assert_eq!(pick_victim(&candidates), Some(1));
    }

    #[test]
    fn excludes_already_stolen_and_mid_retry() {
        let candidates = [
            Candidate { hash_index: 0, remaining: 20_000_000, already_stolen: true, retry_attempts: 0 },
            Candidate { hash_index: 1, remaining: 20_000_000, already_stolen: false, retry_attempts: 1 },
        ];
        assert_eq!(pick_victim(&candidates), None);
    }

    #[test]
    fn excludes_below_minimum_remaining() {
        let candidates = [Candidate {
            hash_index: 0,
            remaining: 1_000_000,
            already_stolen: false,
            retry_attempts: 0,
        }];
        assert_eq!(pick_victim(&candidates), None);
    }

    #[test]
    fn speed_threshold() {
        assert!(should_attempt_steal(11_000_000.0));
        assert!(!should_attempt_steal(9_000_000.0));
    }
}

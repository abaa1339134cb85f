//! Slow-part policy decision (pure function, see `SPEC_FULL.md` §4.2).

use super::calibration::MIN_PART_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowAction {
    /// Keep downloading this part without further slow checks.
    ForceContinue,
    /// At budget; keep going but don't reset timers (the source's `repeated` flag).
    ContinueRepeated,
    /// Split the remaining range 50/50 and spawn a sibling for the tail half.
    Respawn { split_at: u64 },
}

pub struct SlowPolicyInput {
    pub current_offset: u64,
    pub final_offset: u64,
    pub current_parts: usize,
    pub max_parts: usize,
    pub current_connections: usize,
    pub max_connections: usize,
}

/// Decide what to do about a part that was reported slow.
pub fn decide(input: SlowPolicyInput) -> SlowAction {
    let remaining = input.final_offset.saturating_sub(input.current_offset);

    if remaining <= 2 * MIN_PART_SIZE {
        return SlowAction::ForceContinue;
    }
    if input.current_parts >= input.max_parts {
        return SlowAction::ForceContinue;
    }
    if input.current_connections >= input.max_connections {
        return SlowAction::ContinueRepeated;
    }

    let split_at = input.current_offset + remaining / 2;
    SlowAction::Respawn { split_at }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SlowPolicyInput {
        SlowPolicyInput {
            current_offset: 0,
            final_offset: 10 * MIN_PART_SIZE,
            current_parts: 2,
            max_parts: 16,
            current_connections: 2,
            max_connections: 16,
        }
    }

    #[test]
    fn respawns_when_budget_allows() {
        let action = decide(base());
        assert_eq!(
            action,
            SlowAction::Respawn {
                split_at: 5 * MIN_PART_SIZE
            }
        );
    }

    #[test]
    fn force_continue_when_remaining_too_small() {
        let mut input = base();
        input.current_offset = 9 * MIN_PART_SIZE;
        assert_eq!(decide(input), SlowAction::ForceContinue);
    }

    #[test]
    fn force_continue_at_max_parts() {
        let mut input = base();
        input.current_parts = 16;
        assert_eq!(decide(input), SlowAction::ForceContinue);
    }

    #[test]
    fn continue_repeated_at_max_connections() {
        let mut input = base();
        input.current_connections = 16;
        assert_eq!(decide(input), SlowAction::ContinueRepeated);
    }

    #[test]
    fn boundary_exactly_two_min_parts_force_continues() {
        let mut input = base();
        input.current_offset = input.final_offset - 2 * MIN_PART_SIZE;
        assert_eq!(decide(input), SlowAction::ForceContinue);
    }
}

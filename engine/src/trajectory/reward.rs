//! Reward shaping helpers
//!
//! Every built-in chief derives its reward from these shared shapes:
//! positive for throughput and goal progress, negative for errors, stalls,
//! and excessive backlog depth. Each helper is a pure function with a
//! bounded output, so summed rewards stay inside the stable
//! `[REWARD_FLOOR, REWARD_CEIL]` range after clamping.

use sdk::types::{REWARD_CEIL, REWARD_FLOOR};

/// Clamp a raw reward into the stable range
pub fn clamped(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(REWARD_FLOOR, REWARD_CEIL)
    } else {
        0.0
    }
}

/// Bonus for completed work units; +2 each, capped at +10
pub fn throughput_bonus(completed: u64) -> f64 {
    (completed as f64 * 2.0).min(10.0)
}

/// Penalty for backlog depth beyond a soft limit; -0.5 per excess unit,
/// floored at -8
pub fn backlog_penalty(depth: u64, soft_limit: u64) -> f64 {
    let excess = depth.saturating_sub(soft_limit);
    (-(excess as f64) * 0.5).max(-8.0)
}

/// Penalty for failures this turn; -4 each, floored at -12
pub fn failure_penalty(failures: u64) -> f64 {
    (-(failures as f64) * 4.0).max(-12.0)
}

/// Penalty for stall recoveries this turn; -2 each, floored at -6
pub fn stall_penalty(stalls: u64) -> f64 {
    (-(stalls as f64) * 2.0).max(-6.0)
}

/// Mild drift penalty for sitting idle; -0.1 per tick, floored at -2
pub fn idle_drift(ticks_idle: u64) -> f64 {
    (-(ticks_idle as f64) * 0.1).max(-2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_bonus_caps() {
        assert!((throughput_bonus(0) - 0.0).abs() < f64::EPSILON);
        assert!((throughput_bonus(3) - 6.0).abs() < f64::EPSILON);
        assert!((throughput_bonus(500) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backlog_penalty_only_beyond_limit() {
        assert!((backlog_penalty(10, 20) - 0.0).abs() < f64::EPSILON);
        assert!((backlog_penalty(24, 20) - (-2.0)).abs() < f64::EPSILON);
        assert!((backlog_penalty(10_000, 20) - (-8.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_and_stall_floors() {
        assert!((failure_penalty(1) - (-4.0)).abs() < f64::EPSILON);
        assert!((failure_penalty(100) - (-12.0)).abs() < f64::EPSILON);
        assert!((stall_penalty(1) - (-2.0)).abs() < f64::EPSILON);
        assert!((stall_penalty(100) - (-6.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamped_handles_non_finite() {
        assert!((clamped(f64::INFINITY) - 0.0).abs() < f64::EPSILON);
        assert!((clamped(f64::NAN) - 0.0).abs() < f64::EPSILON);
        assert!((clamped(99.0) - REWARD_CEIL).abs() < f64::EPSILON);
        assert!((clamped(-99.0) - REWARD_FLOOR).abs() < f64::EPSILON);
    }

    #[test]
    fn test_helpers_are_deterministic() {
        for n in 0..50u64 {
            assert_eq!(throughput_bonus(n), throughput_bonus(n));
            assert_eq!(backlog_penalty(n, 10), backlog_penalty(n, 10));
            assert_eq!(idle_drift(n), idle_drift(n));
        }
    }
}

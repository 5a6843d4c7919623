// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Age-driven expansion of the tolerated rank difference.

use serde::{Deserialize, Serialize};

/// Parameters of the widening step function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideningConfig {
    /// Age increment, in milliseconds, per widening step.
    pub step_ms: u64,
    /// Rank-difference increment granted per elapsed `step_ms`.
    pub step_diff: u64,
    /// Maximum allowed difference this function can ever return.
    pub cap: u64,
}

/// The maximum rank difference tolerated for a ticket of the given `age_ms`.
///
/// `allowed = min(floor(age_ms / step_ms) * step_diff, cap)`. Monotonically
/// non-decreasing in `age_ms`; returns `0` while `age_ms < step_ms`.
#[must_use]
pub fn allowed_diff(age_ms: u64, config: &WideningConfig) -> u64 {
    if config.step_ms == 0 {
        return config.cap;
    }
    let steps = age_ms / config.step_ms;
    let widened = steps.saturating_mul(config.step_diff);
    widened.min(config.cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> WideningConfig {
        WideningConfig {
            step_ms: 200,
            step_diff: 25,
            cap: 1000,
        }
    }

    #[test]
    fn zero_below_first_step() {
        assert_eq!(allowed_diff(0, &cfg()), 0);
        assert_eq!(allowed_diff(199, &cfg()), 0);
    }

    #[test]
    fn widens_in_discrete_steps() {
        assert_eq!(allowed_diff(200, &cfg()), 25);
        assert_eq!(allowed_diff(399, &cfg()), 25);
        assert_eq!(allowed_diff(400, &cfg()), 50);
    }

    #[test]
    fn caps_at_configured_maximum() {
        assert_eq!(allowed_diff(1_000_000, &cfg()), 1000);
    }

    #[test]
    fn monotonically_non_decreasing_over_sampled_ages() {
        let c = cfg();
        let mut prev = 0;
        for age in (0..20_000).step_by(37) {
            let cur = allowed_diff(age, &c);
            assert!(cur >= prev, "widening must never shrink with age");
            prev = cur;
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_monotonic_and_capped(a in 0u64..100_000, b in 0u64..100_000) {
            let c = cfg();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let d_lo = allowed_diff(lo, &c);
            let d_hi = allowed_diff(hi, &c);
            proptest::prop_assert!(d_lo <= d_hi);
            proptest::prop_assert!(d_hi <= c.cap);
        }
    }
}

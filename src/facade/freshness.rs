// =============================================================================
// Freshness penalty — worst-feed-wins staleness scoring
// =============================================================================
//
// Every input feeding a candidate (trades, book, klines) carries an age.
// The facade takes the oldest of them ("worst feed wins") and converts it
// into an exponential decay penalty applied to the composite score. Ages
// under the soft-start grace period carry no penalty; past the hard limit
// the symbol is dropped outright (spec's StaleData error).
// =============================================================================

/// `penalty(age)` in `[0, 1]`: 1.0 = fully fresh, 0.0 = fully stale.
///
/// `age <= soft_start_s`  -> 1.0 (no penalty, inside the grace window)
/// `soft_start_s < age < hard_limit_s` -> `exp(-(age - soft_start_s) / tau_s)`
/// `age >= hard_limit_s`  -> 0.0 (caller should treat as StaleData)
pub fn freshness_penalty(age_s: f64, soft_start_s: f64, tau_s: f64, hard_limit_s: f64) -> f64 {
    if age_s <= soft_start_s {
        return 1.0;
    }
    if age_s >= hard_limit_s {
        return 0.0;
    }
    (-(age_s - soft_start_s) / tau_s).exp()
}

/// Take the maximum age across a set of per-feed ages ("worst feed wins").
pub fn worst_feed_age(ages_s: &[f64]) -> f64 {
    ages_s.iter().cloned().fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOFT: f64 = 8.0;
    const TAU: f64 = 30.0;
    const HARD: f64 = 90.0;

    #[test]
    fn within_grace_window_no_penalty() {
        assert_eq!(freshness_penalty(0.0, SOFT, TAU, HARD), 1.0);
        assert_eq!(freshness_penalty(8.0, SOFT, TAU, HARD), 1.0);
    }

    #[test]
    fn past_hard_limit_is_zero() {
        assert_eq!(freshness_penalty(90.0, SOFT, TAU, HARD), 0.0);
        assert_eq!(freshness_penalty(200.0, SOFT, TAU, HARD), 0.0);
    }

    #[test]
    fn decays_exponentially_between_bounds() {
        let p = freshness_penalty(38.0, SOFT, TAU, HARD); // age - soft = 30 = tau
        assert!((p - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn worst_feed_picks_max_age() {
        assert_eq!(worst_feed_age(&[1.0, 40.0, 3.0]), 40.0);
        assert_eq!(worst_feed_age(&[]), 0.0);
    }
}

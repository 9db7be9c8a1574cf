// =============================================================================
// Composite scorer (spec §4.4)
// =============================================================================
//
// Pure function over a `ResidualSet` and the regime's `WeightBlend`. The
// social residual is applied outside the weighted budget and caps the final
// score at 110; the weighted base is clamped to [0, 100] before social is
// added so that a single dominant factor cannot exceed the 100% weight
// budget before the social adjustment is layered on.
// =============================================================================

use crate::types::{ResidualSet, WeightBlend};

/// Map an unbounded `momentum_core` onto a comparable 0-100 scale. Centered
/// at 50 so a flat (zero) momentum reading sits mid-scale; an Open Question
/// left by the spec (momentum_core's raw domain is "unbounded real" with no
/// prescribed normalization) — see DESIGN.md.
fn normalize_momentum_core(momentum_core: f64) -> f64 {
    (momentum_core + 50.0).clamp(0.0, 100.0)
}

/// Weighted composite plus capped social, clamped to [0, 110].
pub fn composite_score(residuals: &ResidualSet, weights: &WeightBlend) -> f64 {
    let momentum_core_normalized = normalize_momentum_core(residuals.momentum_core);

    let base = weights.w_momentum * momentum_core_normalized
        + weights.w_technical * residuals.technical_resid
        + weights.w_volume * residuals.volume_resid
        + weights.w_quality * residuals.quality_resid
        + weights.w_catalyst * residuals.catalyst_resid;

    let base_clamped = base.clamp(0.0, 100.0);
    let composite = base_clamped + residuals.social_resid_capped;
    composite.clamp(0.0, 110.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> WeightBlend {
        WeightBlend { w_momentum: 0.425, w_technical: 0.20, w_volume: 0.155, w_quality: 0.085, w_catalyst: 0.135 }
    }

    fn residuals(momentum_core: f64, social: f64) -> ResidualSet {
        ResidualSet {
            momentum_core,
            technical_resid: 18.0,
            volume_resid: 22.0,
            quality_resid: 15.0,
            catalyst_resid: 10.0,
            social_resid_capped: social,
        }
    }

    #[test]
    fn clamps_to_110_maximum() {
        let score = composite_score(&residuals(200.0, 10.0), &weights());
        assert_eq!(score, 110.0);
    }

    #[test]
    fn clamps_to_zero_minimum() {
        let score = composite_score(&residuals(-200.0, -10.0), &weights());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn monotonic_in_momentum_core() {
        let w = weights();
        let low = composite_score(&residuals(10.0, 0.0), &w);
        let high = composite_score(&residuals(20.0, 0.0), &w);
        assert!(high >= low);
    }

    #[test]
    fn social_applied_outside_weight_budget() {
        let w = weights();
        let base = composite_score(&residuals(0.0, 0.0), &w);
        let with_social = composite_score(&residuals(0.0, 7.0), &w);
        assert!((with_social - base - 7.0).abs() < 1e-9);
    }
}

// =============================================================================
// Gram-Schmidt orthogonalization (spec §4.4)
// =============================================================================
//
// `momentum_core` is protected and never residualized. The remaining four
// factors (plus social) are residualized in strict sequence against the
// growing orthogonal basis, each step projecting the raw factor series onto
// the bases already established. Because the established bases are mutually
// orthogonal by construction, projecting onto each individually and summing
// equals projecting onto their span in one step.
// =============================================================================

use crate::types::{FactorSet, ResidualSet};

const SOCIAL_CAP: f64 = 10.0;

/// Residualize the most recent observation in `window` (the last element)
/// against the rolling sample. Spec requires `window.len() >= 100` for a
/// statistically meaningful projection; shorter windows still produce a
/// result (the projection coefficients are simply noisier), since the
/// orchestrator must degrade gracefully rather than abort a symbol outright
/// for want of history.
pub fn orthogonalize(window: &[FactorSet]) -> ResidualSet {
    assert!(!window.is_empty(), "orthogonalize requires at least one observation");

    let momentum: Vec<f64> = window.iter().map(|f| f.momentum_core).collect();
    let technical: Vec<f64> = window.iter().map(|f| f.technical).collect();
    let volume: Vec<f64> = window.iter().map(|f| f.volume).collect();
    let quality: Vec<f64> = window.iter().map(|f| f.quality).collect();
    let catalyst: Vec<f64> = window.iter().map(|f| f.catalyst).collect();
    let social: Vec<f64> = window.iter().map(|f| f.social).collect();

    let technical_resid = residualize(&technical, &[&momentum]);
    let volume_resid = residualize(&volume, &[&momentum, &technical_resid]);
    let quality_resid = residualize(&quality, &[&momentum, &technical_resid, &volume_resid]);
    let catalyst_resid = residualize(&catalyst, &[&momentum, &technical_resid, &volume_resid, &quality_resid]);
    let social_resid = residualize(
        &social,
        &[&momentum, &technical_resid, &volume_resid, &quality_resid, &catalyst_resid],
    );

    let last = window.len() - 1;
    ResidualSet {
        momentum_core: momentum[last],
        technical_resid: technical_resid[last],
        volume_resid: volume_resid[last],
        quality_resid: quality_resid[last],
        catalyst_resid: catalyst_resid[last],
        social_resid_capped: social_resid[last].clamp(-SOCIAL_CAP, SOCIAL_CAP),
    }
}

/// Subtract from `x` its projection onto each vector in `bases` (all in R^n,
/// n = x.len()). Bases assumed mutually orthogonal.
fn residualize(x: &[f64], bases: &[&Vec<f64>]) -> Vec<f64> {
    let mut resid = x.to_vec();
    for basis in bases {
        let denom: f64 = basis.iter().map(|b| b * b).sum();
        if denom.abs() < 1e-12 {
            continue;
        }
        let numer: f64 = x.iter().zip(basis.iter()).map(|(xv, bv)| xv * bv).sum();
        let coeff = numer / denom;
        for (r, b) in resid.iter_mut().zip(basis.iter()) {
            *r -= coeff * b;
        }
    }
    resid
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let cov: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
    let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_window(n: usize, seed: u64) -> Vec<FactorSet> {
        // Deterministic pseudo-random series (no rand crate use here, so
        // results are reproducible without a seeded RNG dependency).
        let mut state = seed;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) as f64 / u32::MAX as f64) - 0.5
        };
        (0..n)
            .map(|i| {
                let m = i as f64 * 0.3 + next() * 2.0;
                FactorSet {
                    momentum_core: m,
                    technical: m * 0.8 + next() * 5.0,
                    volume: m * 0.2 + next() * 10.0,
                    quality: next() * 20.0 + 50.0,
                    catalyst: next() * 10.0,
                    social: next() * 30.0,
                }
            })
            .collect()
    }

    #[test]
    fn momentum_core_passes_through_unchanged() {
        let window = make_window(150, 42);
        let last_momentum = window.last().unwrap().momentum_core;
        let residual = orthogonalize(&window);
        assert_eq!(residual.momentum_core, last_momentum);
    }

    #[test]
    fn social_resid_is_capped_at_plus_minus_ten() {
        let mut window = make_window(150, 7);
        if let Some(last) = window.last_mut() {
            last.social = 500.0;
        }
        let residual = orthogonalize(&window);
        assert!(residual.social_resid_capped <= 10.0);
        assert!(residual.social_resid_capped >= -10.0);
    }

    #[test]
    fn technical_resid_decorrelates_from_momentum() {
        let window = make_window(200, 99);
        let momentum: Vec<f64> = window.iter().map(|f| f.momentum_core).collect();

        // Recompute the residual series (not just the final value) to check
        // the correlation bound across the whole window.
        let technical: Vec<f64> = window.iter().map(|f| f.technical).collect();
        let technical_resid = residualize(&technical, &[&momentum]);

        let rho = correlation(&momentum, &technical_resid);
        assert!(rho.abs() < 0.1, "expected |rho| < 0.1, got {rho}");
    }

    #[test]
    fn single_observation_window_does_not_panic() {
        let window = make_window(1, 3);
        let residual = orthogonalize(&window);
        assert_eq!(residual.momentum_core, window[0].momentum_core);
    }
}

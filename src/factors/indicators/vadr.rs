// =============================================================================
// Volume-Adjusted Daily Range (VADR)
// =============================================================================
//
// Range-expansion-on-real-volume proxy: each bar's range and volume are
// compared against the trailing window's average, and the two ratios are
// multiplied. A reading near 1.0 means the bar's range/volume looked like
// an ordinary bar in the window; a reading well above 1.0 means the move
// came with range expansion backed by above-average volume rather than a
// thin, low-volume wick.
// =============================================================================

use crate::types::Bar;

/// VADR for every bar once `window` trailing bars are available (oldest
/// first); the first `window` bars have no trailing baseline and are
/// omitted.
pub fn rolling_vadr_series(bars: &[Bar], window: usize) -> Vec<f64> {
    if window == 0 || bars.len() <= window {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(bars.len() - window);
    for i in window..bars.len() {
        let baseline = &bars[i - window..i];
        let avg_range: f64 =
            baseline.iter().map(|b| b.h - b.l).sum::<f64>() / window as f64;
        let avg_volume: f64 = baseline.iter().map(|b| b.volume).sum::<f64>() / window as f64;

        if avg_range <= 0.0 || avg_volume <= 0.0 {
            continue;
        }

        let range = bars[i].h - bars[i].l;
        let vadr = (range / avg_range) * (bars[i].volume / avg_volume);
        if vadr.is_finite() {
            out.push(vadr);
        }
    }
    out
}

/// Most recent VADR reading, or `None` if there aren't enough bars to form
/// a trailing baseline of `window` bars.
pub fn calculate_vadr(bars: &[Bar], window: usize) -> Option<f64> {
    rolling_vadr_series(bars, window).last().copied()
}

/// The `p`-th percentile (0.0-1.0) of the rolling VADR series, used as the
/// microstructure-tier floor's adaptive component (spec's P80 VADR window).
pub fn vadr_percentile(bars: &[Bar], window: usize, p: f64) -> f64 {
    let series = rolling_vadr_series(bars, window);
    if series.is_empty() {
        return 0.0;
    }
    let mut sorted = series;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(h: f64, l: f64, volume: f64) -> Bar {
        Bar { ts_open_ms: 0, ts_close_ms: 0, o: (h + l) / 2.0, h, l, c: (h + l) / 2.0, volume }
    }

    #[test]
    fn insufficient_bars_returns_none() {
        let bars = vec![bar(102.0, 98.0, 100.0); 5];
        assert!(calculate_vadr(&bars, 10).is_none());
    }

    #[test]
    fn window_zero_returns_none() {
        let bars = vec![bar(102.0, 98.0, 100.0); 20];
        assert!(calculate_vadr(&bars, 0).is_none());
    }

    #[test]
    fn flat_series_reads_near_one() {
        let bars = vec![bar(102.0, 98.0, 100.0); 30];
        let vadr = calculate_vadr(&bars, 20).unwrap();
        assert!((vadr - 1.0).abs() < 1e-9, "expected ~1.0 on a flat series, got {vadr}");
    }

    #[test]
    fn range_and_volume_expansion_raises_vadr() {
        let mut bars = vec![bar(102.0, 98.0, 100.0); 20];
        bars.push(bar(110.0, 90.0, 400.0));
        let vadr = calculate_vadr(&bars, 20).unwrap();
        assert!(vadr > 2.0, "expected expansion to push VADR well above baseline, got {vadr}");
    }

    #[test]
    fn rolling_series_length_matches_window_offset() {
        let bars = vec![bar(102.0, 98.0, 100.0); 30];
        let series = rolling_vadr_series(&bars, 20);
        assert_eq!(series.len(), 10);
    }

    #[test]
    fn percentile_of_empty_series_is_zero() {
        let bars = vec![bar(102.0, 98.0, 100.0); 5];
        assert_eq!(vadr_percentile(&bars, 20, 0.8), 0.0);
    }
}

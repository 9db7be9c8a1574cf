// =============================================================================
// On-Balance Volume (OBV) slope
// =============================================================================
//
// Classic OBV: a running total of volume, signed by the direction of each
// bar's close versus the previous close. The factor engine only consumes a
// slope, not the raw cumulative series, so this module folds straight to a
// normalized rate of change over the trailing window.
// =============================================================================

use crate::types::Bar;

/// Cumulative OBV series, one value per bar (first bar seeds at 0.0).
pub fn calculate_obv(bars: &[Bar]) -> Vec<f64> {
    let mut obv = Vec::with_capacity(bars.len());
    let mut running = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        if i > 0 {
            let prev_close = bars[i - 1].c;
            if bar.c > prev_close {
                running += bar.volume;
            } else if bar.c < prev_close {
                running -= bar.volume;
            }
        }
        obv.push(running);
    }
    obv
}

/// Slope of the OBV series over the trailing `window` bars, normalized by
/// average volume so the result sits in a small range comparable across
/// symbols of very different liquidity. `None` if fewer than two bars are
/// available in the window.
pub fn obv_slope(bars: &[Bar], window: usize) -> Option<f64> {
    if bars.len() < 2 {
        return None;
    }
    let start = bars.len().saturating_sub(window.max(2));
    let windowed = &bars[start..];

    let obv = calculate_obv(windowed);
    let first = obv.first().copied()?;
    let last = obv.last().copied()?;
    let n = (obv.len() - 1) as f64;
    if n <= 0.0 {
        return None;
    }

    let avg_volume: f64 = windowed.iter().map(|b| b.volume).sum::<f64>() / windowed.len() as f64;
    if avg_volume <= 0.0 {
        return None;
    }

    let raw_slope = (last - first) / n;
    Some((raw_slope / avg_volume).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(c: f64, volume: f64) -> Bar {
        Bar { ts_open_ms: 0, ts_close_ms: 0, o: c, h: c, l: c, c, volume }
    }

    #[test]
    fn too_few_bars_returns_none() {
        let bars = vec![bar(100.0, 10.0)];
        assert!(obv_slope(&bars, 20).is_none());
    }

    #[test]
    fn rising_closes_give_positive_slope() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(100.0 + i as f64, 10.0)).collect();
        let slope = obv_slope(&bars, 10).unwrap();
        assert!(slope > 0.0, "expected positive slope, got {slope}");
    }

    #[test]
    fn falling_closes_give_negative_slope() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(100.0 - i as f64, 10.0)).collect();
        let slope = obv_slope(&bars, 10).unwrap();
        assert!(slope < 0.0, "expected negative slope, got {slope}");
    }

    #[test]
    fn flat_closes_give_zero_slope() {
        let bars = vec![bar(100.0, 10.0); 10];
        let slope = obv_slope(&bars, 10).unwrap();
        assert_eq!(slope, 0.0);
    }

    #[test]
    fn cumulative_obv_matches_hand_computation() {
        let bars = vec![bar(100.0, 10.0), bar(105.0, 5.0), bar(102.0, 3.0), bar(102.0, 2.0)];
        let obv = calculate_obv(&bars);
        assert_eq!(obv, vec![0.0, 5.0, 2.0, 2.0]);
    }
}

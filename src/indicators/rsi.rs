// =============================================================================
// Relative Strength Index (RSI) — single-window
// =============================================================================
//
// Step 1 — Take the last `period` transitions of the series (each close
//          against the one immediately before it).
// Step 2 — gain = sum of non-negative deltas, loss = sum of |negative deltas|.
// Step 3 — gain + loss == 0  => 50 (flat window).
//          RS  = gain / (loss == 0 ? 1 : loss)
//          RSI = 100 - 100 / (1 + RS)
//
// No Wilder smoothing: every call recomputes from the raw window, so two
// identical windows always produce identical values.
//
// Thresholds:  RSI > 70 => OVERBOUGHT,  RSI < 30 => OVERSOLD.
// =============================================================================

/// Compute the RSI of the most recent `period` transitions in `closes`.
///
/// Returns `None` when `closes.len() < period + 1`.  `period` is expected to
/// be validated (>= 2) at the configuration boundary.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let (gain, loss) = window.windows(2).fold((0.0_f64, 0.0_f64), |(g, l), w| {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            (g + delta, l)
        } else {
            (g, l - delta)
        }
    });

    if gain + loss == 0.0 {
        return Some(50.0);
    }

    let rs = gain / if loss == 0.0 { 1.0 } else { loss };
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Human-readable zone for an RSI value.
pub fn rsi_zone(value: f64) -> &'static str {
    if value >= 70.0 {
        "OVERBOUGHT"
    } else if value <= 30.0 {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_empty_input() {
        assert!(calculate_rsi(&[], 14).is_none());
    }

    #[test]
    fn rsi_insufficient_data() {
        // Need period+1 closes. 14 closes => 13 deltas < 14.
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(calculate_rsi(&closes, 14).is_none());
        for len in 0..=5 {
            assert!(calculate_rsi(&closes[..len], 5).is_none(), "len {len}");
        }
    }

    #[test]
    fn rsi_exactly_period_plus_one() {
        let closes: Vec<f64> = (1..=15).map(|x| x as f64).collect();
        assert!(calculate_rsi(&closes, 14).is_some());
    }

    #[test]
    fn rsi_worked_example() {
        // deltas 2, -1, 2, -1, 2 => gain 6, loss 2 => RS 3 => RSI 75
        let closes = [10.0, 12.0, 11.0, 13.0, 12.0, 14.0];
        let rsi = calculate_rsi(&closes, 5).unwrap();
        assert!((rsi - 75.0).abs() < 1e-10, "got {rsi}");
    }

    #[test]
    fn rsi_only_uses_last_window() {
        // A huge drop far outside the window must not matter.
        let mut closes = vec![1000.0, 1.0];
        closes.extend([10.0, 12.0, 11.0, 13.0, 12.0, 14.0]);
        let rsi = calculate_rsi(&closes, 5).unwrap();
        assert!((rsi - 75.0).abs() < 1e-10, "got {rsi}");
    }

    #[test]
    fn rsi_all_gains_is_near_100() {
        // No losses => loss divisor falls back to 1, RS = gain.
        let closes: Vec<f64> = (1..=30).map(|x| x as f64 * 10.0).collect();
        let rsi = calculate_rsi(&closes, 14).unwrap();
        // gain = 140, RS = 140 => RSI = 100 - 100/141
        assert!((rsi - (100.0 - 100.0 / 141.0)).abs() < 1e-10);
        assert!(rsi > 99.0);
    }

    #[test]
    fn rsi_all_losses_is_zero() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let rsi = calculate_rsi(&closes, 14).unwrap();
        assert!(rsi.abs() < 1e-10, "expected 0.0, got {rsi}");
    }

    #[test]
    fn rsi_flat_market() {
        let closes = vec![100.0; 20];
        assert_eq!(calculate_rsi(&closes, 14), Some(50.0));
    }

    #[test]
    fn rsi_range_check() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for period in 2..=14 {
            let v = calculate_rsi(&closes, period).unwrap();
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }

    #[test]
    fn zones() {
        assert_eq!(rsi_zone(75.0), "OVERBOUGHT");
        assert_eq!(rsi_zone(25.0), "OVERSOLD");
        assert_eq!(rsi_zone(50.0), "NEUTRAL");
    }
}

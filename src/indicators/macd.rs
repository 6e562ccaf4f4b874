// =============================================================================
// MACD — windowed-reseed variant
// =============================================================================
//
//   macd_line   = EMA_fast(last fast+signal closes) - EMA_slow(last slow+signal closes)
//   macd_values = for i in (n-slow-signal+1)..=(n-slow):
//                   EMA_fast(closes[i .. i+fast]) - EMA_slow(closes[i .. i+slow])
//   signal_line = EMA_signal(macd_values)
//   histogram   = macd_line - signal_line
//
// Every EMA here is seeded from the first element of its own slice (see
// `ema.rs`), so the signal line is rebuilt from scratch on each call.  The
// series is capped at 100 closes, which keeps the nested recomputation cheap.
// =============================================================================

use serde::Serialize;

use super::ema::calculate_ema;

/// Result of a MACD evaluation.  All three fields are `None` together when the
/// series is too short.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacdOutput {
    pub macd: Option<f64>,
    pub signal: Option<f64>,
    pub hist: Option<f64>,
}

/// Compute MACD over `closes` with the given fast / slow / signal periods.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let n = closes.len();
    if signal == 0 || n < slow + signal {
        return MacdOutput::default();
    }

    let fast_ema = calculate_ema(tail(closes, fast + signal), fast);
    let slow_ema = calculate_ema(tail(closes, slow + signal), slow);
    let (Some(fast_ema), Some(slow_ema)) = (fast_ema, slow_ema) else {
        return MacdOutput::default();
    };
    let macd_line = fast_ema - slow_ema;

    let start = n - slow - signal + 1;
    let macd_values: Vec<f64> = (start..=n - slow)
        .filter_map(|i| {
            let f = calculate_ema(&closes[i..(i + fast).min(n)], fast)?;
            let s = calculate_ema(&closes[i..(i + slow).min(n)], slow)?;
            Some(f - s)
        })
        .collect();

    let Some(signal_line) = calculate_ema(&macd_values, signal) else {
        return MacdOutput::default();
    };

    MacdOutput {
        macd: Some(macd_line),
        signal: Some(signal_line),
        hist: Some(macd_line - signal_line),
    }
}

/// Last `count` elements of `values` (the whole slice if it is shorter).
fn tail(values: &[f64], count: usize) -> &[f64] {
    &values[values.len().saturating_sub(count)..]
}

// =============================================================================
// Exponential Moving Average (EMA) — first-value seeded
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_0      = values[0]
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The seed is the first element of the slice handed in, not an SMA of the
// first `period` values.  The result therefore depends on exactly which
// sub-slice the caller passes; MACD relies on that.
// =============================================================================

/// Compute the final EMA value of `values` for look-back `period`.
///
/// Returns `None` for an empty slice.
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    let (&seed, rest) = values.split_first()?;
    let multiplier = 2.0 / (period as f64 + 1.0);

    let ema = rest
        .iter()
        .fold(seed, |prev, &v| v * multiplier + prev * (1.0 - multiplier));

    Some(ema)
}

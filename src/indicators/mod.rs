// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators published for every
// watched instrument.  Insufficient history is a normal result and is always
// reported as `None`, never as zero.

pub mod ema;
pub mod macd;
pub mod rsi;

use serde::Serialize;

use crate::runtime_config::IndicatorParams;

pub use macd::MacdOutput;

/// Indicator values computed from one price-series snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndicatorValues {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
}

/// Evaluate RSI and MACD over `closes` with already-validated `params`.
pub fn evaluate(closes: &[f64], params: &IndicatorParams) -> IndicatorValues {
    let rsi = rsi::calculate_rsi(closes, params.rsi_period);
    let MacdOutput { macd, signal, hist } =
        macd::calculate_macd(closes, params.macd_fast, params.macd_slow, params.macd_signal);

    IndicatorValues {
        rsi,
        macd,
        macd_signal: signal,
        macd_hist: hist,
    }
}

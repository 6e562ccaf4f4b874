// =============================================================================
// Configuration-boundary errors
// =============================================================================
//
// Everything else in the engine reports through `anyhow`; configuration input
// gets a typed error so the API can answer 400 instead of 500.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be >= {min}, got {value}")]
    PeriodTooSmall {
        name: &'static str,
        value: usize,
        min: usize,
    },

    #[error("unknown kline interval: {0}")]
    UnknownInterval(String),

    #[error("{name} must be > 0")]
    ZeroValue { name: &'static str },
}

// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable parameter of the aggregation engine lives here so that it can
// be reconfigured at runtime without a restart.  Indicator periods take effect
// on the next candle; the watched set and interval go through the
// subscription manager's debounce.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::types::{Instrument, KlineInterval};

/// Smallest accepted look-back for any indicator period.
pub const MIN_PERIOD: usize = 2;

/// Watched until discovery replaces them, when no symbols are configured.
pub const PLACEHOLDER_SYMBOLS: [&str; 2] = ["BTCUSDT", "ETHUSDT"];

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_series_capacity() -> usize {
    100
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_ws_url() -> String {
    "wss://wbs.mexc.com/ws".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.mexc.com".to_string()
}

fn default_discovery_interval_secs() -> u64 {
    30
}

fn default_quote_suffix() -> String {
    "USDT".to_string()
}

fn default_watch_count() -> usize {
    10
}

fn default_backfill_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}

// =============================================================================
// IndicatorParams
// =============================================================================

/// Look-back periods for the published indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,

    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
        }
    }
}

impl IndicatorParams {
    /// Reject any period below [`MIN_PERIOD`].  The indicator functions
    /// assume they only ever see validated parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
        ];
        for (name, value) in checks {
            if value < MIN_PERIOD {
                return Err(ConfigError::PeriodTooSmall {
                    name,
                    value,
                    min: MIN_PERIOD,
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Aurora Pulse engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Watched set ---------------------------------------------------------

    /// Instruments to watch on startup.  `None` means nothing was chosen:
    /// the placeholder pair is watched until the first discovery, which
    /// replaces it with the first `default_watch_count` instruments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,

    /// Candle sampling interval.
    #[serde(default)]
    pub interval: KlineInterval,

    // --- Indicators ----------------------------------------------------------

    #[serde(default)]
    pub indicators: IndicatorParams,

    /// Maximum closes retained per instrument.
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,

    // --- Subscription management --------------------------------------------

    /// Quiet period before a burst of watched-set changes is applied.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Delay before reopening a channel that closed on its own.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Close a group's channel when the watched set becomes empty instead of
    /// leaving it open with its last subscription.
    #[serde(default)]
    pub close_when_empty: bool,

    /// Clear every price series when the sampling interval changes so closes
    /// of different intervals are never mixed in one window.
    #[serde(default = "default_true")]
    pub reset_series_on_interval_change: bool,

    // --- Exchange endpoints --------------------------------------------------

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    // --- Discovery & backfill ------------------------------------------------

    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,

    /// Only discovered symbols ending with this quote asset are kept.
    #[serde(default = "default_quote_suffix")]
    pub quote_suffix: String,

    /// Number of discovered instruments watched by default.
    #[serde(default = "default_watch_count")]
    pub default_watch_count: usize,

    /// Number of klines requested when seeding a short series.
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: None,
            interval: KlineInterval::default(),
            indicators: IndicatorParams::default(),
            series_capacity: default_series_capacity(),
            debounce_ms: default_debounce_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            close_when_empty: false,
            reset_series_on_interval_change: true,
            ws_url: default_ws_url(),
            rest_base_url: default_rest_base_url(),
            discovery_interval_secs: default_discovery_interval_secs(),
            quote_suffix: default_quote_suffix(),
            default_watch_count: default_watch_count(),
            backfill_limit: default_backfill_limit(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid runtime config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            interval = %config.interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.indicators.validate()?;
        if self.series_capacity == 0 {
            return Err(ConfigError::ZeroValue {
                name: "series_capacity",
            });
        }
        Ok(())
    }

    /// Whether the watched set was chosen by the file, the environment or
    /// a watch update rather than left to discovery.
    pub fn has_explicit_symbols(&self) -> bool {
        self.symbols.is_some()
    }

    /// Configured symbols (or the placeholder pair) as normalised,
    /// de-duplicated instruments.
    pub fn instruments(&self) -> Vec<Instrument> {
        let symbols: Vec<&str> = match &self.symbols {
            Some(list) => list.iter().map(String::as_str).collect(),
            None => PLACEHOLDER_SYMBOLS.to_vec(),
        };
        let mut out: Vec<Instrument> = Vec::with_capacity(symbols.len());
        for s in symbols.into_iter().filter(|s| !s.trim().is_empty()) {
            let inst = Instrument::new(s);
            if !out.contains(&inst) {
                out.push(inst);
            }
        }
        out
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

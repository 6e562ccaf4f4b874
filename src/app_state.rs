// =============================================================================
// Central Application State — Aurora Pulse
// =============================================================================
//
// Ties the stores, the dispatcher and the subscription manager together and
// builds the serialisable market payload for the REST API and the WebSocket
// push feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for configuration and the error log.
//   - Stores manage their own interior locking behind Arc.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel::Connector;
use crate::discovery::{Universe, UniverseInfo};
use crate::error::ConfigError;
use crate::indicators::rsi::rsi_zone;
use crate::indicators::IndicatorValues;
use crate::market_data::{
    Candle, DispatchStats, LivePriceBook, RollingSeriesStore, SnapshotStore, StreamDispatcher,
    StreamKind,
};
use crate::mexc::MexcClient;
use crate::runtime_config::{IndicatorParams, RuntimeConfig};
use crate::subscription::{
    DesiredState, GroupStatus, ManagerSettings, SubscriptionManager,
};
use crate::types::{Instrument, KlineInterval};

// =============================================================================
// Error Record
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// Payloads
// =============================================================================

/// One instrument as rendered by the dashboard.  Absent values are `null`.
#[derive(Debug, Clone, Serialize)]
pub struct MarketRow {
    pub instrument: Instrument,
    pub price: Option<f64>,
    pub price_updated_at: Option<i64>,
    pub trade_count: u64,
    pub candle: Option<Candle>,
    #[serde(flatten)]
    pub indicators: IndicatorValues,
    /// OVERBOUGHT / OVERSOLD / NEUTRAL, when RSI is known.
    pub rsi_zone: Option<&'static str>,
    pub series_len: usize,
    pub computed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub interval: KlineInterval,
    pub indicators: IndicatorParams,
    pub rows: Vec<MarketRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub dispatch: DispatchStats,
    pub trade_group: GroupStatus,
    pub candle_group: GroupStatus,
    pub universe: UniverseInfo,
    /// Instruments with a published indicator snapshot.
    pub snapshots: usize,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Partial update of the desired state.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct WatchUpdate {
    #[serde(default)]
    pub instruments: Option<Vec<String>>,
    #[serde(default)]
    pub interval: Option<String>,
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    /// Bumped on every state mutation that is not already counted by the
    /// stores (config, watch, universe, errors).
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub config_path: PathBuf,
    /// Shared with the dispatcher; read on every candle.
    pub indicator_params: Arc<RwLock<IndicatorParams>>,

    pub series: Arc<RollingSeriesStore>,
    pub live_prices: Arc<LivePriceBook>,
    pub snapshots: Arc<SnapshotStore>,
    pub dispatcher: Arc<StreamDispatcher>,

    pub universe: Arc<Universe>,
    pub mexc: MexcClient,
    pub subscriptions: SubscriptionManager,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the stores and start the subscription groups on `connector`.
    /// Must be called inside a tokio runtime.
    pub fn new<C: Connector>(
        config: RuntimeConfig,
        config_path: impl Into<PathBuf>,
        connector: Arc<C>,
    ) -> anyhow::Result<Self> {
        let mexc = MexcClient::new(config.rest_base_url.clone())?;

        let indicator_params = Arc::new(RwLock::new(config.indicators));
        let series = Arc::new(RollingSeriesStore::new(config.series_capacity));
        let live_prices = Arc::new(LivePriceBook::new());
        let snapshots = Arc::new(SnapshotStore::new());
        let dispatcher = Arc::new(StreamDispatcher::new(
            series.clone(),
            live_prices.clone(),
            snapshots.clone(),
            indicator_params.clone(),
        ));
        dispatcher.set_interval(config.interval);

        let settings = ManagerSettings {
            debounce: config.debounce(),
            reconnect_delay: config.reconnect_delay(),
            close_when_empty: config.close_when_empty,
        };
        let initial = DesiredState::new(config.instruments(), config.interval);
        let subscriptions =
            SubscriptionManager::start(connector, dispatcher.clone(), initial, settings);

        Ok(Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),
            indicator_params,
            series,
            live_prices,
            snapshots,
            dispatcher,
            universe: Arc::new(Universe::new()),
            mexc,
            subscriptions,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        })
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Combined version: changes whenever config, a snapshot or a live price
    /// changes.  Every component only ever grows.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
            + self.snapshots.version()
            + self.live_prices.trade_count()
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Desired state ───────────────────────────────────────────────────

    pub fn set_watched(&self, instruments: Vec<Instrument>) {
        self.subscriptions.set_watched(instruments);
        self.sync_config_from_desired();
    }

    /// Validate and apply a partial watch update.  Unknown intervals are
    /// rejected before anything changes.
    pub fn update_watch(&self, update: WatchUpdate) -> Result<DesiredState, ConfigError> {
        let mut desired = self.subscriptions.desired();

        if let Some(tag) = update.interval.as_deref() {
            desired.interval = tag.parse::<KlineInterval>()?;
        }
        if let Some(symbols) = update.instruments {
            desired.instruments = symbols
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(Instrument::new)
                .collect();
        }

        info!(
            instruments = desired.instruments.len(),
            interval = %desired.interval,
            "watch updated"
        );
        self.subscriptions.update(desired.clone());
        self.sync_config_from_desired();
        Ok(desired)
    }

    /// Watch the first `n` instruments of the discovered universe.
    pub fn reset_to_top(&self, n: Option<usize>) -> Vec<Instrument> {
        let n = n.unwrap_or_else(|| self.runtime_config.read().default_watch_count);
        let top = self.universe.top(n);
        info!(count = top.len(), "watch reset to top of universe");
        self.set_watched(top.clone());
        top
    }

    fn sync_config_from_desired(&self) {
        let desired = self.subscriptions.desired();
        {
            let mut config = self.runtime_config.write();
            config.symbols = Some(
                desired
                    .instruments
                    .iter()
                    .map(|i| i.as_str().to_string())
                    .collect(),
            );
            config.interval = desired.interval;
        }
        self.increment_version();
        self.persist_config();
    }

    // ── Indicator parameters ────────────────────────────────────────────

    /// Validate and install new periods; applied from the next candle.
    pub fn update_indicator_params(
        &self,
        params: IndicatorParams,
    ) -> Result<IndicatorParams, ConfigError> {
        params.validate()?;
        *self.indicator_params.write() = params;
        self.runtime_config.write().indicators = params;
        self.increment_version();
        info!(
            rsi = params.rsi_period,
            fast = params.macd_fast,
            slow = params.macd_slow,
            signal = params.macd_signal,
            "indicator periods updated"
        );
        self.persist_config();
        Ok(params)
    }

    pub fn persist_config(&self) {
        let config = self.runtime_config.read().clone();
        if let Err(e) = config.save(&self.config_path) {
            warn!(error = %e, "failed to save runtime config");
        }
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    pub fn market_row(&self, instrument: &Instrument) -> MarketRow {
        let live = self.live_prices.get(instrument);
        let snapshot = self.snapshots.get(instrument);

        let indicators = snapshot
            .as_ref()
            .map(|s| s.indicators)
            .unwrap_or_default();

        MarketRow {
            instrument: instrument.clone(),
            price: live.map(|l| l.price),
            price_updated_at: live.map(|l| l.updated_at),
            trade_count: live.map_or(0, |l| l.trade_count),
            candle: snapshot.as_ref().map(|s| s.candle.clone()),
            indicators,
            rsi_zone: indicators.rsi.map(rsi_zone),
            series_len: self.series.len(instrument),
            computed_at: snapshot.as_ref().map(|s| s.computed_at),
        }
    }

    /// Rows for the watched set only; late frames for dropped instruments
    /// are never rendered.
    pub fn build_market_snapshot(&self) -> MarketSnapshot {
        let desired = self.subscriptions.desired();
        let rows = desired
            .instruments
            .iter()
            .map(|inst| self.market_row(inst))
            .collect();

        MarketSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            interval: desired.interval,
            indicators: *self.indicator_params.read(),
            rows,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            dispatch: self.dispatcher.stats(),
            trade_group: self.subscriptions.status(StreamKind::Trade),
            candle_group: self.subscriptions.status(StreamKind::Candle),
            universe: self.universe.info(),
            snapshots: self.snapshots.len(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Instrument Discovery — periodic universe refresh
// =============================================================================
//
// Polls the exchange for tradable symbols with the configured quote suffix.
// The universe is advisory: it feeds search and "reset to top N", and on the
// first successful load replaces the placeholder watched set unless one was
// chosen explicitly.  It never restricts what may be watched.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::types::Instrument;

#[derive(Debug, Clone, Serialize)]
pub struct UniverseInfo {
    pub count: usize,
    pub loaded_at: Option<i64>,
    pub refreshes: u64,
}

#[derive(Default)]
pub struct Universe {
    instruments: RwLock<Vec<Instrument>>,
    loaded_at: RwLock<Option<i64>>,
    refreshes: AtomicU64,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the universe.  Returns `true` on the first load.
    pub fn replace(&self, instruments: Vec<Instrument>) -> bool {
        *self.instruments.write() = instruments;
        let first = self.loaded_at.write().replace(Utc::now().timestamp_millis()).is_none();
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        first
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.read().is_some()
    }

    pub fn all(&self) -> Vec<Instrument> {
        self.instruments.read().clone()
    }

    pub fn top(&self, n: usize) -> Vec<Instrument> {
        self.instruments.read().iter().take(n).cloned().collect()
    }

    /// Case-insensitive substring match; an empty query returns everything.
    pub fn search(&self, query: &str) -> Vec<Instrument> {
        let needle = query.trim().to_uppercase();
        self.instruments
            .read()
            .iter()
            .filter(|inst| inst.as_str().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn info(&self) -> UniverseInfo {
        UniverseInfo {
            count: self.instruments.read().len(),
            loaded_at: *self.loaded_at.read(),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Refresh the universe forever at the configured period.
pub async fn run_discovery_poller(state: Arc<AppState>) {
    let (period, suffix) = {
        let config = state.runtime_config.read();
        (
            Duration::from_secs(config.discovery_interval_secs.max(1)),
            config.quote_suffix.clone(),
        )
    };
    info!(period_secs = period.as_secs(), quote = %suffix, "discovery poller starting");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        refresh_universe(&state, &suffix).await;
    }
}

pub async fn refresh_universe(state: &Arc<AppState>, quote_suffix: &str) {
    match state.mexc.exchange_symbols(quote_suffix).await {
        Ok(instruments) => {
            let count = instruments.len();
            let first = state.universe.replace(instruments);
            state.increment_version();
            if first {
                info!(count, "instrument universe loaded");
                adopt_default_watch(state);
            }
        }
        Err(e) => {
            warn!(error = %e, "instrument discovery failed");
            state.push_error(format!("discovery failed: {e:#}"));
        }
    }
}

/// First load only: unless the watched set was chosen explicitly (or is
/// empty), it becomes the top N of the universe.
fn adopt_default_watch(state: &AppState) {
    let (explicit, n) = {
        let config = state.runtime_config.read();
        (config.has_explicit_symbols(), config.default_watch_count)
    };
    if explicit && !state.subscriptions.desired().instruments.is_empty() {
        return;
    }
    let top = state.universe.top(n);
    if top.is_empty() {
        return;
    }
    info!(count = top.len(), "watching top instruments of the universe");
    state.set_watched(top);
}

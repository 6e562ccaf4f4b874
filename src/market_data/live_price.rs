// =============================================================================
// Live Price Book — last-trade price per instrument
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::Instrument;

/// Last traded price for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivePrice {
    pub price: f64,
    /// Local receive time, milliseconds since the UNIX epoch.
    pub updated_at: i64,
    /// Trade events seen for this instrument.
    pub trade_count: u64,
}

/// Keeps the most recent trade price per instrument.  Independent of the
/// candle cadence: only trade events touch it.
pub struct LivePriceBook {
    prices: RwLock<HashMap<Instrument, LivePrice>>,
    /// Total number of trades processed.
    trade_count: AtomicU64,
}

impl LivePriceBook {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            trade_count: AtomicU64::new(0),
        }
    }

    /// Record an incoming trade.
    pub fn process_trade(&self, instrument: &Instrument, price: f64, at_ms: i64) -> LivePrice {
        let mut map = self.prices.write();
        let entry = map.entry(instrument.clone()).or_insert(LivePrice {
            price,
            updated_at: at_ms,
            trade_count: 0,
        });
        entry.price = price;
        entry.updated_at = at_ms;
        entry.trade_count += 1;

        self.trade_count.fetch_add(1, Ordering::Relaxed);
        *entry
    }

    pub fn get(&self, instrument: &Instrument) -> Option<LivePrice> {
        self.prices.read().get(instrument).copied()
    }

    pub fn last_price(&self, instrument: &Instrument) -> Option<f64> {
        self.get(instrument).map(|p| p.price)
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }

    pub fn retain(&self, mut keep: impl FnMut(&Instrument) -> bool) -> usize {
        let mut map = self.prices.write();
        let before = map.len();
        map.retain(|inst, _| keep(inst));
        before - map.len()
    }
}

impl Default for LivePriceBook {
    fn default() -> Self {
        Self::new()
    }
}

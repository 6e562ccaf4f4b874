use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::Instrument;

/// Default number of closes kept per instrument.
pub const DEFAULT_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// RollingSeriesStore -- thread-safe bounded close history per instrument
// ---------------------------------------------------------------------------

/// Thread-safe ring buffer of closing prices per instrument, oldest first.
///
/// Series are created lazily on the first append.  Appending to a full series
/// evicts the oldest close first, so a series never holds more than
/// `capacity` entries.  Every read hands out an owned copy: callers get a
/// stable snapshot even while appends continue.
pub struct RollingSeriesStore {
    series: RwLock<HashMap<Instrument, VecDeque<f64>>>,
    capacity: usize,
}

impl RollingSeriesStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append `close` and return the series as it stands right after the
    /// append.  The copy is taken under the same write lock, so a recompute
    /// from it always reflects exactly this append.
    pub fn append(&self, instrument: &Instrument, close: f64) -> Vec<f64> {
        let mut map = self.series.write();
        let ring = map
            .entry(instrument.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        while ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(close);

        ring.iter().copied().collect()
    }

    /// Current closes for `instrument` (oldest first); empty if none yet.
    pub fn get(&self, instrument: &Instrument) -> Vec<f64> {
        let map = self.series.read();
        map.get(instrument)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, instrument: &Instrument) -> usize {
        let map = self.series.read();
        map.get(instrument).map_or(0, VecDeque::len)
    }

    /// Replace a short series with historical closes (oldest first), keeping
    /// only the newest `capacity` of them.
    ///
    /// Does nothing when the series already holds at least `min_existing`
    /// closes, so live data that arrived while the history request was in
    /// flight is never overwritten by an older picture.  Returns whether the
    /// series was seeded.
    pub fn seed(&self, instrument: &Instrument, closes: &[f64], min_existing: usize) -> bool {
        let mut map = self.series.write();
        let ring = map
            .entry(instrument.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        if ring.len() >= min_existing || closes.is_empty() {
            return false;
        }

        let start = closes.len().saturating_sub(self.capacity);
        ring.clear();
        ring.extend(closes[start..].iter().copied());
        debug!(instrument = %instrument, seeded = ring.len(), "price series seeded");
        true
    }

    /// Drop every series whose instrument does not satisfy `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&Instrument) -> bool) -> usize {
        let mut map = self.series.write();
        let before = map.len();
        map.retain(|inst, _| keep(inst));
        before - map.len()
    }

    pub fn clear(&self) {
        self.series.write().clear();
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        self.series.read().keys().cloned().collect()
    }
}

impl Default for RollingSeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Instrument {
        Instrument::new("BTCUSDT")
    }

    #[test]
    fn ring_buffer_trimming() {
        let store = RollingSeriesStore::new(3);
        for i in 0..5 {
            store.append(&btc(), 100.0 + i as f64);
        }
        assert_eq!(store.len(&btc()), 3);
        assert_eq!(store.get(&btc()), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn default_capacity_evicts_first_after_101_appends() {
        let store = RollingSeriesStore::default();
        for i in 0..101 {
            let snapshot = store.append(&btc(), i as f64);
            assert!(snapshot.len() <= 100);
        }
        let series = store.get(&btc());
        assert_eq!(series.len(), 100);
        assert!(!series.contains(&0.0));
        assert_eq!(series.first(), Some(&1.0));
        assert_eq!(series.last(), Some(&100.0));
    }

    #[test]
    fn append_returns_post_append_snapshot() {
        let store = RollingSeriesStore::new(10);
        store.append(&btc(), 1.0);
        let snap = store.append(&btc(), 2.0);
        assert_eq!(snap, vec![1.0, 2.0]);

        // Later appends do not alter an earlier snapshot.
        store.append(&btc(), 3.0);
        assert_eq!(snap, vec![1.0, 2.0]);
    }

    #[test]
    fn series_are_independent_per_instrument() {
        let store = RollingSeriesStore::new(10);
        let eth = Instrument::new("ETHUSDT");
        store.append(&btc(), 1.0);
        store.append(&eth, 2.0);
        store.append(&eth, 3.0);
        assert_eq!(store.get(&btc()), vec![1.0]);
        assert_eq!(store.get(&eth), vec![2.0, 3.0]);
    }

    #[test]
    fn unknown_instrument_is_empty() {
        let store = RollingSeriesStore::new(10);
        assert!(store.get(&Instrument::new("XYZUSDT")).is_empty());
        assert_eq!(store.len(&Instrument::new("XYZUSDT")), 0);
    }

    #[test]
    fn seed_fills_short_series_up_to_capacity() {
        let store = RollingSeriesStore::new(5);
        store.append(&btc(), 99.0);
        let history: Vec<f64> = (1..=8).map(|x| x as f64).collect();
        assert!(store.seed(&btc(), &history, 3));
        assert_eq!(store.get(&btc()), vec![4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn seed_keeps_series_that_is_long_enough() {
        let store = RollingSeriesStore::new(5);
        for i in 0..3 {
            store.append(&btc(), i as f64);
        }
        assert!(!store.seed(&btc(), &[10.0, 11.0], 3));
        assert_eq!(store.get(&btc()), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn retain_drops_unwanted_series() {
        let store = RollingSeriesStore::new(5);
        let eth = Instrument::new("ETHUSDT");
        store.append(&btc(), 1.0);
        store.append(&eth, 1.0);
        let dropped = store.retain(|inst| inst.as_str() == "ETHUSDT");
        assert_eq!(dropped, 1);
        assert_eq!(store.instruments(), vec![eth]);
    }
}

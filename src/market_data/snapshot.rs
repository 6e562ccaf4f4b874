// =============================================================================
// Indicator Snapshots — immutable, atomically published per instrument
// =============================================================================
//
// Each candle produces a brand-new `IndicatorSnapshot` that replaces the
// previous one wholesale.  Readers get an `Arc` to an immutable value, so no
// lock is ever held across the publish boundary and a reader can never see a
// half-updated mix of old OHLCV and new indicator fields.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::indicators::IndicatorValues;
use crate::market_data::protocol::Candle;
use crate::types::Instrument;

/// Capacity of the change feed; slow observers see `Lagged` and resync by
/// querying the store.
const UPDATE_FEED_CAPACITY: usize = 1024;

/// Latest candle plus the indicators computed from the series it closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub instrument: Instrument,
    #[serde(flatten)]
    pub candle: Candle,
    #[serde(flatten)]
    pub indicators: IndicatorValues,
    /// Closes in the series the indicators were computed from.
    pub series_len: usize,
    /// Local compute time, milliseconds since the UNIX epoch.
    pub computed_at: i64,
}

/// Per-instrument store of the most recent snapshot, with a change feed.
pub struct SnapshotStore {
    entries: RwLock<HashMap<Instrument, Arc<IndicatorSnapshot>>>,
    updates: broadcast::Sender<Arc<IndicatorSnapshot>>,
    version: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_FEED_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            updates,
            version: AtomicU64::new(0),
        }
    }

    /// Replace the snapshot for its instrument and notify observers.
    pub fn publish(&self, snapshot: IndicatorSnapshot) -> Arc<IndicatorSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.entries
            .write()
            .insert(snapshot.instrument.clone(), Arc::clone(&snapshot));
        self.version.fetch_add(1, Ordering::SeqCst);
        // No receivers is fine: the store itself is the source of truth.
        let _ = self.updates.send(Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self, instrument: &Instrument) -> Option<Arc<IndicatorSnapshot>> {
        self.entries.read().get(instrument).cloned()
    }

    /// Subscribe to every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<IndicatorSnapshot>> {
        self.updates.subscribe()
    }

    /// Incremented on every publish.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn retain(&self, mut keep: impl FnMut(&Instrument) -> bool) -> usize {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|inst, _| keep(inst));
        before - map.len()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Watched-set maintenance — pruning and bounded backfill
// =============================================================================
//
// Reacts to desired states as they are applied by the subscription manager:
//
//   instrument left the watched set   -> drop its series, price, snapshot
//   interval changed                  -> clear every series (optional)
//   instrument joined / series reset  -> if fewer than BACKFILL_THRESHOLD
//                                        closes, seed from REST klines
//
// Backfill never overwrites a series that filled up from the live stream
// while the request was in flight, and is discarded if the interval or the
// watched set changed in the meantime.  A seeded series is re-evaluated at
// once instead of waiting for the next candle.
// =============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::market_data::{LivePriceBook, RollingSeriesStore, SnapshotStore};
use crate::subscription::DesiredState;
use crate::types::{Instrument, KlineInterval};

/// Series shorter than this are backfilled.
pub const BACKFILL_THRESHOLD: usize = 10;

/// Prune the stores for the transition `previous -> next` and return the
/// instruments that need backfill.
pub fn prune_for_transition(
    series: &RollingSeriesStore,
    live_prices: &LivePriceBook,
    snapshots: &SnapshotStore,
    previous: &DesiredState,
    next: &DesiredState,
    reset_on_interval_change: bool,
) -> Vec<Instrument> {
    let interval_changed = previous.interval != next.interval;

    let removed_series = if interval_changed && reset_on_interval_change {
        let n = series.instruments().len();
        series.clear();
        snapshots.retain(|_| false);
        n
    } else {
        let removed = series.retain(|inst| next.is_watched(inst));
        snapshots.retain(|inst| next.is_watched(inst));
        removed
    };
    let removed_prices = live_prices.retain(|inst| next.is_watched(inst));

    if removed_series > 0 || removed_prices > 0 {
        debug!(removed_series, removed_prices, "pruned unwatched instruments");
    }

    next.instruments
        .iter()
        .filter(|inst| series.len(inst) < BACKFILL_THRESHOLD)
        .cloned()
        .collect()
}

/// Follow settled desired states until the manager is dropped.
///
/// The state already in `settled` when this starts is handled first, so a
/// settle that happened before the receiver was handed over is not lost.
pub async fn run_watch_maintenance(
    state: Arc<AppState>,
    mut settled: watch::Receiver<DesiredState>,
) {
    // The settled channel starts out empty: nothing applied yet.
    let mut previous = DesiredState::default();

    loop {
        let next = settled.borrow_and_update().clone();
        if next != previous {
            apply_transition(&state, &previous, &next);
            previous = next;
        }
        if settled.changed().await.is_err() {
            break;
        }
    }
    debug!("watch maintenance stopped");
}

fn apply_transition(state: &Arc<AppState>, previous: &DesiredState, next: &DesiredState) {
    let reset = state.runtime_config.read().reset_series_on_interval_change;

    let candidates = prune_for_transition(
        &state.series,
        &state.live_prices,
        &state.snapshots,
        previous,
        next,
        reset,
    );
    state.increment_version();

    if !candidates.is_empty() {
        let backfill_state = state.clone();
        let interval = next.interval;
        tokio::spawn(async move {
            backfill(&backfill_state, candidates, interval).await;
        });
    }
}

async fn backfill(
    state: &Arc<AppState>,
    instruments: Vec<Instrument>,
    interval: KlineInterval,
) {
    let limit = state.runtime_config.read().backfill_limit;
    if limit == 0 {
        return;
    }

    let mut seeded = 0usize;
    for inst in instruments {
        let closes = match state.mexc.recent_closes(&inst, interval, limit).await {
            Ok(Some(closes)) => closes,
            Ok(None) => {
                debug!(interval = %interval, "no REST klines for interval, skipping backfill");
                return;
            }
            Err(e) => {
                warn!(instrument = %inst, error = %e, "backfill request failed");
                continue;
            }
        };
        if seed_from_history(state, &inst, interval, &closes) {
            seeded += 1;
        }
    }

    if seeded > 0 {
        state.increment_version();
        info!(seeded, interval = %interval, "price series backfilled");
    }
}

/// Seed one series from fetched closes and republish its indicators.
///
/// Discarded when the interval or the watched set moved on while the request
/// was in flight, or when live closes already filled the series.
fn seed_from_history(
    state: &AppState,
    instrument: &Instrument,
    interval: KlineInterval,
    closes: &[f64],
) -> bool {
    let desired = state.subscriptions.desired();
    if desired.interval != interval || !desired.is_watched(instrument) {
        debug!(instrument = %instrument, "backfill outdated, discarding");
        return false;
    }
    if !state.series.seed(instrument, closes, BACKFILL_THRESHOLD) {
        return false;
    }
    state.dispatcher.recompute(instrument);
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app_state::tests::{state_with_config, test_state};
    use crate::market_data::protocol::tests::candle_json;
    use crate::market_data::StreamKind;
    use crate::runtime_config::RuntimeConfig;

    struct Stores {
        series: RollingSeriesStore,
        prices: LivePriceBook,
        snapshots: SnapshotStore,
    }

    fn stores() -> Stores {
        Stores {
            series: RollingSeriesStore::new(100),
            prices: LivePriceBook::new(),
            snapshots: SnapshotStore::new(),
        }
    }

    fn inst(s: &str) -> Instrument {
        Instrument::new(s)
    }

    fn desired(symbols: &[&str], interval: KlineInterval) -> DesiredState {
        DesiredState::new(symbols.iter().map(|s| inst(s)), interval)
    }

    fn fill(series: &RollingSeriesStore, symbol: &str, n: usize) {
        for i in 0..n {
            series.append(&inst(symbol), i as f64);
        }
    }

    #[test]
    fn removed_instruments_are_dropped() {
        let s = stores();
        fill(&s.series, "A", 20);
        fill(&s.series, "B", 20);
        s.prices.process_trade(&inst("A"), 1.0, 0);
        s.prices.process_trade(&inst("B"), 2.0, 0);

        let backfill = prune_for_transition(
            &s.series,
            &s.prices,
            &s.snapshots,
            &desired(&["A", "B"], KlineInterval::Min15),
            &desired(&["B"], KlineInterval::Min15),
            true,
        );

        assert!(backfill.is_empty());
        assert_eq!(s.series.len(&inst("A")), 0);
        assert_eq!(s.series.len(&inst("B")), 20);
        assert!(s.prices.get(&inst("A")).is_none());
        assert_eq!(s.prices.last_price(&inst("B")), Some(2.0));
    }

    #[test]
    fn new_and_short_series_need_backfill() {
        let s = stores();
        fill(&s.series, "A", 20);
        fill(&s.series, "B", 3);

        let backfill = prune_for_transition(
            &s.series,
            &s.prices,
            &s.snapshots,
            &desired(&["A", "B"], KlineInterval::Min15),
            &desired(&["A", "B", "C"], KlineInterval::Min15),
            true,
        );
        assert_eq!(backfill, vec![inst("B"), inst("C")]);
    }

    #[test]
    fn interval_change_clears_every_series() {
        let s = stores();
        fill(&s.series, "A", 20);
        s.prices.process_trade(&inst("A"), 1.0, 0);

        let backfill = prune_for_transition(
            &s.series,
            &s.prices,
            &s.snapshots,
            &desired(&["A"], KlineInterval::Min15),
            &desired(&["A"], KlineInterval::Hour1),
            true,
        );
        assert_eq!(s.series.len(&inst("A")), 0);
        assert_eq!(backfill, vec![inst("A")]);
        // Trade prices do not depend on the interval.
        assert_eq!(s.prices.last_price(&inst("A")), Some(1.0));
    }

    #[test]
    fn interval_change_keeps_series_when_reset_disabled() {
        let s = stores();
        fill(&s.series, "A", 20);

        let backfill = prune_for_transition(
            &s.series,
            &s.prices,
            &s.snapshots,
            &desired(&["A"], KlineInterval::Min15),
            &desired(&["A"], KlineInterval::Hour1),
            false,
        );
        assert_eq!(s.series.len(&inst("A")), 20);
        assert!(backfill.is_empty());
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    /// No REST traffic: backfill returns before fetching.
    fn offline_state(symbols: &[&str]) -> (Arc<AppState>, tempfile::TempDir) {
        let (state, dir) = state_with_config(RuntimeConfig {
            symbols: Some(symbols.iter().map(|s| s.to_string()).collect()),
            backfill_limit: 0,
            ..RuntimeConfig::default()
        });
        (Arc::new(state), dir)
    }

    #[tokio::test]
    async fn history_is_discarded_after_interval_change() {
        let (state, _dir) = test_state(&["BTCUSDT"]);
        state.subscriptions.set_interval(KlineInterval::Hour1);

        let seeded = seed_from_history(&state, &inst("BTCUSDT"), KlineInterval::Min15, &rising(20));
        assert!(!seeded);
        assert_eq!(state.series.len(&inst("BTCUSDT")), 0);

        let seeded = seed_from_history(&state, &inst("BTCUSDT"), KlineInterval::Hour1, &rising(20));
        assert!(seeded);
        assert_eq!(state.series.len(&inst("BTCUSDT")), 20);
    }

    #[tokio::test]
    async fn history_is_discarded_for_unwatched_instrument() {
        let (state, _dir) = test_state(&["BTCUSDT"]);
        state.set_watched(vec![inst("ETHUSDT")]);

        let seeded = seed_from_history(&state, &inst("BTCUSDT"), KlineInterval::Min15, &rising(20));
        assert!(!seeded);
        assert_eq!(state.series.len(&inst("BTCUSDT")), 0);
    }

    #[tokio::test]
    async fn seeding_republishes_indicators() {
        let (state, _dir) = test_state(&["BTCUSDT"]);
        state
            .dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "100"));
        assert!(state.snapshots.get(&inst("BTCUSDT")).unwrap().indicators.rsi.is_none());

        let seeded = seed_from_history(&state, &inst("BTCUSDT"), KlineInterval::Min15, &rising(40));
        assert!(seeded);

        let row = state.market_row(&inst("BTCUSDT"));
        assert_eq!(row.series_len, 40);
        assert_eq!(row.indicators.rsi, Some(100.0 - 100.0 / 15.0));
        assert!(row.indicators.macd.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_follows_settled_states() {
        let (state, _dir) = offline_state(&["A", "B"]);
        fill(&state.series, "A", 20);
        fill(&state.series, "B", 20);
        fill(&state.series, "Z", 20);
        state.live_prices.process_trade(&inst("A"), 1.0, 0);

        let (tx, rx) = watch::channel(desired(&["A", "B"], KlineInterval::Min15));
        let task = tokio::spawn(run_watch_maintenance(state.clone(), rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.series.len(&inst("Z")), 0);
        assert_eq!(state.series.len(&inst("A")), 20);

        tx.send_replace(desired(&["B"], KlineInterval::Min15));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.series.len(&inst("A")), 0);
        assert!(state.live_prices.get(&inst("A")).is_none());
        assert_eq!(state.series.len(&inst("B")), 20);

        tx.send_replace(desired(&["B"], KlineInterval::Hour1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.series.len(&inst("B")), 0);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn settle_before_maintenance_starts_is_not_lost() {
        let (state, _dir) = offline_state(&["A"]);
        fill(&state.series, "Z", 20);

        // Let the groups settle before anyone subscribes.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let settled = state.subscriptions.watch_settled();
        assert!(settled.borrow().is_watched(&inst("A")));

        tokio::spawn(run_watch_maintenance(state.clone(), settled));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.series.len(&inst("Z")), 0);
    }
}

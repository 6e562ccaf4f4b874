// =============================================================================
// Stream Dispatcher — routes inbound frames into the stores
// =============================================================================
//
// trade frame  -> LivePriceBook only
// candle frame -> RollingSeriesStore::append(close)
//              -> indicators::evaluate(post-append snapshot, current params)
//              -> SnapshotStore::publish(new snapshot, replacing the old one)
//
// A frame that fails to parse is logged and counted, then dropped; it never
// touches any store and never stops the stream.  Candles tagged with an
// interval other than the applied one are dropped the same way, so late
// frames from before an interval change never reach a reset series.  Frames for instruments that
// are no longer watched are still processed; the render surface filters by
// the watched set.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::indicators;
use crate::market_data::live_price::LivePriceBook;
use crate::market_data::price_series::RollingSeriesStore;
use crate::market_data::protocol::{
    parse_candle_frame, parse_trade_frame, CandleEvent, InboundFrame, StreamKind, TradeEvent,
};
use crate::market_data::snapshot::{IndicatorSnapshot, SnapshotStore};
use crate::runtime_config::IndicatorParams;
use crate::types::{Instrument, KlineInterval};

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatchStats {
    pub trades: u64,
    pub candles: u64,
    pub acks: u64,
    pub dropped: u64,
    pub stale_interval: u64,
}

pub struct StreamDispatcher {
    series: Arc<RollingSeriesStore>,
    live_prices: Arc<LivePriceBook>,
    snapshots: Arc<SnapshotStore>,
    /// Read on every candle, so period changes apply from the next recompute.
    params: Arc<RwLock<IndicatorParams>>,
    /// Candle interval currently subscribed; set when the candle group settles.
    interval: RwLock<KlineInterval>,

    trades: AtomicU64,
    candles: AtomicU64,
    acks: AtomicU64,
    dropped: AtomicU64,
    stale_interval: AtomicU64,
}

impl StreamDispatcher {
    pub fn new(
        series: Arc<RollingSeriesStore>,
        live_prices: Arc<LivePriceBook>,
        snapshots: Arc<SnapshotStore>,
        params: Arc<RwLock<IndicatorParams>>,
    ) -> Self {
        Self {
            series,
            live_prices,
            snapshots,
            params,
            interval: RwLock::new(KlineInterval::default()),
            trades: AtomicU64::new(0),
            candles: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            stale_interval: AtomicU64::new(0),
        }
    }

    pub fn set_interval(&self, interval: KlineInterval) {
        let previous = std::mem::replace(&mut *self.interval.write(), interval);
        if previous != interval {
            debug!(from = %previous, to = %interval, "dispatcher interval switched");
        }
    }

    pub fn interval(&self) -> KlineInterval {
        *self.interval.read()
    }

    /// Handle one text frame received on the channel for `kind`.
    pub fn handle_text(&self, kind: StreamKind, text: &str) {
        let parsed = match kind {
            StreamKind::Trade => parse_trade_frame(text),
            StreamKind::Candle => parse_candle_frame(text),
        };

        match parsed {
            Ok(InboundFrame::Trade(ev)) => self.apply_trade(ev),
            Ok(InboundFrame::Candle(ev)) => {
                self.apply_candle(ev);
            }
            Ok(InboundFrame::Ack { id, msg }) => {
                self.acks.fetch_add(1, Ordering::Relaxed);
                debug!(stream = %kind, id = ?id, msg = %msg, "subscription acknowledged");
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(stream = %kind, error = %e, "dropping malformed frame");
            }
        }
    }

    pub fn apply_trade(&self, ev: TradeEvent) {
        self.live_prices
            .process_trade(&ev.instrument, ev.price, Utc::now().timestamp_millis());
        self.trades.fetch_add(1, Ordering::Relaxed);
    }

    /// Append the close, recompute, publish.  Returns the published snapshot,
    /// or `None` when the candle belongs to another interval.
    pub fn apply_candle(&self, ev: CandleEvent) -> Option<Arc<IndicatorSnapshot>> {
        let CandleEvent { instrument, candle } = ev;

        let expected = self.interval();
        if candle.interval != expected.tag() {
            self.stale_interval.fetch_add(1, Ordering::Relaxed);
            debug!(
                instrument = %instrument,
                got = %candle.interval,
                expected = %expected,
                "dropping candle for stale interval"
            );
            return None;
        }

        let closes = self.series.append(&instrument, candle.close);
        let params = *self.params.read();
        let values = indicators::evaluate(&closes, &params);

        debug!(
            instrument = %instrument,
            close = candle.close,
            series_len = closes.len(),
            rsi = ?values.rsi,
            macd = ?values.macd,
            "candle applied"
        );

        self.candles.fetch_add(1, Ordering::Relaxed);
        Some(self.snapshots.publish(IndicatorSnapshot {
            instrument,
            candle,
            indicators: values,
            series_len: closes.len(),
            computed_at: Utc::now().timestamp_millis(),
        }))
    }

    /// Re-evaluate `instrument` from its stored series without appending,
    /// keeping the last candle.  Used after a backfill replaced the series.
    pub fn recompute(&self, instrument: &Instrument) -> Option<Arc<IndicatorSnapshot>> {
        let previous = self.snapshots.get(instrument)?;
        let closes = self.series.get(instrument);
        if closes.is_empty() {
            return None;
        }
        let params = *self.params.read();
        let values = indicators::evaluate(&closes, &params);
        Some(self.snapshots.publish(IndicatorSnapshot {
            instrument: instrument.clone(),
            candle: previous.candle.clone(),
            indicators: values,
            series_len: closes.len(),
            computed_at: Utc::now().timestamp_millis(),
        }))
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            trades: self.trades.load(Ordering::Relaxed),
            candles: self.candles.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            stale_interval: self.stale_interval.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::protocol::tests::{candle_json, trade_json};

    struct Fixture {
        series: Arc<RollingSeriesStore>,
        prices: Arc<LivePriceBook>,
        snapshots: Arc<SnapshotStore>,
        params: Arc<RwLock<IndicatorParams>>,
        dispatcher: StreamDispatcher,
    }

    fn fixture() -> Fixture {
        let series = Arc::new(RollingSeriesStore::new(100));
        let prices = Arc::new(LivePriceBook::new());
        let snapshots = Arc::new(SnapshotStore::new());
        let params = Arc::new(RwLock::new(IndicatorParams::default()));
        let dispatcher = StreamDispatcher::new(
            series.clone(),
            prices.clone(),
            snapshots.clone(),
            params.clone(),
        );
        Fixture {
            series,
            prices,
            snapshots,
            params,
            dispatcher,
        }
    }

    fn btc() -> Instrument {
        Instrument::new("BTCUSDT")
    }

    #[test]
    fn trade_updates_live_price_only() {
        let f = fixture();
        f.dispatcher
            .handle_text(StreamKind::Trade, &trade_json("BTCUSDT", "37001.5"));

        assert_eq!(f.prices.last_price(&btc()), Some(37001.5));
        assert!(f.series.get(&btc()).is_empty());
        assert!(f.snapshots.get(&btc()).is_none());
        assert_eq!(f.dispatcher.stats().trades, 1);
    }

    #[test]
    fn candle_appends_and_publishes() {
        let f = fixture();
        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "37020.00"));

        assert_eq!(f.series.get(&btc()), vec![37020.0]);
        let snap = f.snapshots.get(&btc()).unwrap();
        assert_eq!(snap.candle.close, 37020.0);
        assert_eq!(snap.candle.open, 37000.0);
        assert_eq!(snap.series_len, 1);
        // One close is not enough history for anything.
        assert_eq!(snap.indicators, indicators::IndicatorValues::default());
        assert!(f.prices.last_price(&btc()).is_none());
    }

    #[test]
    fn indicators_appear_once_history_is_long_enough() {
        let f = fixture();
        *f.params.write() = IndicatorParams {
            rsi_period: 5,
            macd_fast: 2,
            macd_slow: 3,
            macd_signal: 2,
        };
        for close in ["10", "12", "11", "13", "12"] {
            f.dispatcher
                .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", close));
            assert!(f.snapshots.get(&btc()).unwrap().indicators.rsi.is_none());
        }
        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "14"));

        let snap = f.snapshots.get(&btc()).unwrap();
        assert!((snap.indicators.rsi.unwrap() - 75.0).abs() < 1e-10);
        assert!(snap.indicators.macd.is_some());
        assert_eq!(snap.series_len, 6);
    }

    #[test]
    fn period_change_applies_on_next_candle() {
        let f = fixture();
        for close in ["10", "12", "11", "13", "12", "14"] {
            f.dispatcher
                .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", close));
        }
        assert!(f.snapshots.get(&btc()).unwrap().indicators.rsi.is_none());

        f.params.write().rsi_period = 2;
        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "15"));
        // deltas over last 2: +2, +1 => no losses => RS = 3 => 75
        let rsi = f.snapshots.get(&btc()).unwrap().indicators.rsi.unwrap();
        assert!((rsi - 75.0).abs() < 1e-10, "got {rsi}");
    }

    #[test]
    fn malformed_candle_leaves_state_unchanged() {
        let f = fixture();
        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "100"));
        let before_series = f.series.get(&btc());
        let before_snap = f.snapshots.get(&btc()).unwrap();

        let missing_close = candle_json("BTCUSDT", "1").replace(r#""c": "1","#, "");
        f.dispatcher.handle_text(StreamKind::Candle, &missing_close);
        f.dispatcher.handle_text(StreamKind::Candle, "{ not json");

        assert_eq!(f.series.get(&btc()), before_series);
        assert_eq!(*f.snapshots.get(&btc()).unwrap(), *before_snap);
        assert_eq!(f.snapshots.version(), 1);
        assert_eq!(f.dispatcher.stats().dropped, 2);
    }

    #[test]
    fn bad_frame_does_not_stall_later_frames() {
        let f = fixture();
        f.dispatcher.handle_text(StreamKind::Candle, "garbage");
        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("ETHUSDT", "2000"));
        assert_eq!(f.series.get(&Instrument::new("ETHUSDT")), vec![2000.0]);
    }

    #[test]
    fn candle_for_other_interval_is_dropped() {
        let f = fixture();
        f.dispatcher.set_interval(KlineInterval::Hour1);

        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "99"));
        assert!(f.series.get(&btc()).is_empty());
        assert!(f.snapshots.get(&btc()).is_none());
        assert_eq!(f.dispatcher.stats().stale_interval, 1);
        assert_eq!(f.dispatcher.stats().candles, 0);

        let hourly = candle_json("BTCUSDT", "100").replace("Min15", "Hour1");
        f.dispatcher.handle_text(StreamKind::Candle, &hourly);
        assert_eq!(f.series.get(&btc()), vec![100.0]);
        assert_eq!(f.snapshots.get(&btc()).unwrap().candle.interval, "Hour1");
    }

    #[test]
    fn recompute_uses_stored_series_and_keeps_candle() {
        let f = fixture();
        *f.params.write() = IndicatorParams {
            rsi_period: 2,
            ..IndicatorParams::default()
        };
        f.dispatcher
            .handle_text(StreamKind::Candle, &candle_json("BTCUSDT", "10"));
        assert!(f.snapshots.get(&btc()).unwrap().indicators.rsi.is_none());

        f.series.seed(&btc(), &[10.0, 12.0, 11.0, 13.0], 10);
        let snap = f.dispatcher.recompute(&btc()).unwrap();
        assert_eq!(snap.series_len, 4);
        assert_eq!(snap.candle.close, 10.0);
        // deltas over last 2: -1, +2 => gain 2, loss 1 => RS 2
        let rsi = snap.indicators.rsi.unwrap();
        assert!((rsi - 200.0 / 3.0).abs() < 1e-10, "got {rsi}");
        assert_eq!(f.dispatcher.stats().candles, 1);
    }

    #[test]
    fn recompute_without_candle_publishes_nothing() {
        let f = fixture();
        f.series.seed(&btc(), &[1.0, 2.0, 3.0], 10);
        assert!(f.dispatcher.recompute(&btc()).is_none());
        assert_eq!(f.snapshots.version(), 0);
    }

    #[test]
    fn ack_frames_touch_nothing() {
        let f = fixture();
        f.dispatcher.handle_text(
            StreamKind::Trade,
            r#"{ "id": 1, "code": 0, "msg": "spot@public.deals.v3.api@BTCUSDT" }"#,
        );
        let stats = f.dispatcher.stats();
        assert_eq!(stats.acks, 1);
        assert_eq!(stats.dropped, 0);
        assert!(f.prices.last_price(&btc()).is_none());
    }
}

// =============================================================================
// Exchange wire protocol — topics, subscription requests, inbound frames
// =============================================================================
//
// Outbound:
//   { "method": "SUBSCRIPTION",   "params": ["<topic>", ...], "id": "<n>" }
//   { "method": "UNSUBSCRIPTION", "params": ["<topic>", ...], "id": "<n>" }
//
// Topics:
//   trade  — spot@public.deals.v3.api@<SYMBOL>
//   candle — spot@public.kline.v3.api@<SYMBOL>@<IntervalTag>
//
// Inbound trade frame:
//   { "c": "spot@public.deals.v3.api@BTCUSDT",
//     "d": { "deals": [ { "p": "37000.12", ... } ] }, ... }
//
// Inbound candle frame:
//   { "s": "BTCUSDT",
//     "d": { "k": { "o": .., "h": .., "l": .., "c": .., "v": .., "a": ..,
//                   "i": "Min15", "t": 1700000000, "T": 1700000900 } }, ... }
//
// Acknowledgement:
//   { "id": 0, "code": 0, "msg": "spot@public.deals.v3.api@BTCUSDT" }
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{Instrument, KlineInterval};

pub const TRADE_TOPIC_PREFIX: &str = "spot@public.deals.v3.api";
pub const KLINE_TOPIC_PREFIX: &str = "spot@public.kline.v3.api";

// ---------------------------------------------------------------------------
// Stream kinds & topics
// ---------------------------------------------------------------------------

/// The two independent stream groups, each carried by its own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Trade,
    Candle,
}

impl StreamKind {
    pub fn topic(self, instrument: &Instrument, interval: KlineInterval) -> String {
        match self {
            Self::Trade => format!("{TRADE_TOPIC_PREFIX}@{instrument}"),
            Self::Candle => format!("{KLINE_TOPIC_PREFIX}@{instrument}@{interval}"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Candle => "candle",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Outbound requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionMethod {
    #[serde(rename = "SUBSCRIPTION")]
    Subscribe,
    #[serde(rename = "UNSUBSCRIPTION")]
    Unsubscribe,
}

/// Subscribe / unsubscribe request sent over a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub method: SubscriptionMethod,
    pub params: Vec<String>,
    pub id: String,
}

impl SubscriptionRequest {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialise subscription request")
    }
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

/// OHLCV fields of one candle as carried by the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Quote-asset turnover.
    pub amount: f64,
    /// Interval tag as reported by the stream (e.g. `Min15`).
    pub interval: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub instrument: Instrument,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleEvent {
    pub instrument: Instrument,
    pub candle: Candle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ack { id: Option<i64>, msg: String },
    Trade(TradeEvent),
    Candle(CandleEvent),
}

/// Parse a frame received on the trade channel.
pub fn parse_trade_frame(text: &str) -> Result<InboundFrame> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse trade JSON")?;

    if let Some(ack) = as_ack(&root) {
        return Ok(ack);
    }

    let topic = root["c"].as_str().context("missing field c")?;
    let symbol = topic
        .rsplit('@')
        .next()
        .filter(|s| !s.is_empty())
        .context("topic has no symbol segment")?;

    let price = parse_string_f64(&root["d"]["deals"][0]["p"], "d.deals[0].p")?;

    Ok(InboundFrame::Trade(TradeEvent {
        instrument: Instrument::new(symbol),
        price,
    }))
}

/// Parse a frame received on the candle channel.
pub fn parse_candle_frame(text: &str) -> Result<InboundFrame> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    if let Some(ack) = as_ack(&root) {
        return Ok(ack);
    }

    let symbol = root["s"].as_str().context("missing field s")?;
    let k = &root["d"]["k"];
    if !k.is_object() {
        anyhow::bail!("missing field d.k");
    }

    let candle = Candle {
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
        amount: parse_string_f64(&k["a"], "k.a")?,
        interval: k["i"].as_str().context("missing field k.i")?.to_string(),
        start_time: parse_i64(&k["t"], "k.t")?,
        end_time: parse_i64(&k["T"], "k.T")?,
    };

    Ok(InboundFrame::Candle(CandleEvent {
        instrument: Instrument::new(symbol),
        candle,
    }))
}

/// Subscription acknowledgements carry `code` + `msg` and no data payload.
fn as_ack(root: &serde_json::Value) -> Option<InboundFrame> {
    if root.get("d").is_some() || root.get("code").is_none() {
        return None;
    }
    let msg = root.get("msg")?.as_str()?.to_string();
    Some(InboundFrame::Ack {
        id: root.get("id").and_then(serde_json::Value::as_i64),
        msg,
    })
}

/// Numeric values arrive either as JSON strings or as numbers.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    let parsed = match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}"))?,
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64"))?,
        serde_json::Value::Null => anyhow::bail!("missing field {name}"),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    };
    if !parsed.is_finite() {
        anyhow::bail!("field {name} is not finite");
    }
    Ok(parsed)
}

fn parse_i64(val: &serde_json::Value, name: &str) -> Result<i64> {
    match val {
        serde_json::Value::Number(n) => n
            .as_i64()
            .with_context(|| format!("field {name} is not an integer")),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("failed to parse {name} as i64: {s}")),
        serde_json::Value::Null => anyhow::bail!("missing field {name}"),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

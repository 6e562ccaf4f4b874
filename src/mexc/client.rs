// =============================================================================
// MEXC REST Client — public market-data endpoints
// =============================================================================
//
// Only unauthenticated endpoints are used:
//   GET /api/v3/exchangeInfo                          instrument universe
//   GET /api/v3/klines?symbol=&interval=&limit=       historical closes
//
// Both are advisory: failures are logged by the caller and never affect the
// live stream.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::types::{Instrument, KlineInterval};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct MexcClient {
    base_url: String,
    client: reqwest::Client,
}

impl MexcClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "MexcClient initialised");

        Ok(Self { base_url, client })
    }

    /// GET /api/v3/exchangeInfo, keeping symbols that end in `quote_suffix`.
    ///
    /// Order follows the exchange response.
    #[instrument(skip(self), name = "mexc::exchange_symbols")]
    pub async fn exchange_symbols(&self, quote_suffix: &str) -> Result<Vec<Instrument>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let body = self.get_json(&url, "/api/v3/exchangeInfo").await?;
        let symbols = parse_exchange_symbols(&body, quote_suffix)?;
        debug!(count = symbols.len(), "exchange symbols fetched");
        Ok(symbols)
    }

    /// GET /api/v3/klines, returning closes oldest first.
    ///
    /// Returns `Ok(None)` for intervals with no REST equivalent.
    #[instrument(skip(self), name = "mexc::recent_closes")]
    pub async fn recent_closes(
        &self,
        instrument: &Instrument,
        interval: KlineInterval,
        limit: usize,
    ) -> Result<Option<Vec<f64>>> {
        let Some(rest_interval) = interval.rest_interval() else {
            return Ok(None);
        };

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, instrument, rest_interval, limit
        );
        let body = self.get_json(&url, "/api/v3/klines").await?;
        let closes = parse_kline_closes(&body)?;
        debug!(instrument = %instrument, interval = %interval, count = closes.len(), "klines fetched");
        Ok(Some(closes))
    }

    async fn get_json(&self, url: &str, endpoint: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {endpoint} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {endpoint} response"))?;

        if !status.is_success() {
            anyhow::bail!("MEXC GET {} returned {}: {}", endpoint, status, body);
        }
        Ok(body)
    }
}

impl std::fmt::Debug for MexcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MexcClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

pub fn parse_exchange_symbols(
    body: &serde_json::Value,
    quote_suffix: &str,
) -> Result<Vec<Instrument>> {
    let entries = body["symbols"]
        .as_array()
        .context("exchangeInfo response missing 'symbols' array")?;

    let suffix = quote_suffix.to_uppercase();
    let mut out: Vec<Instrument> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(symbol) = entry["symbol"].as_str() else {
            continue;
        };
        let inst = Instrument::new(symbol);
        if inst.as_str().ends_with(&suffix) && !out.contains(&inst) {
            out.push(inst);
        }
    }
    Ok(out)
}

/// Kline rows are arrays: [openTime, open, high, low, close, volume, closeTime, quoteVolume].
pub fn parse_kline_closes(body: &serde_json::Value) -> Result<Vec<f64>> {
    let rows = body.as_array().context("klines response is not an array")?;

    let mut closes = Vec::with_capacity(rows.len());
    for row in rows {
        let close = row
            .as_array()
            .and_then(|arr| arr.get(4))
            .and_then(|v| match v {
                serde_json::Value::String(s) => s.parse::<f64>().ok(),
                other => other.as_f64(),
            })
            .filter(|c| c.is_finite());

        match close {
            Some(c) => closes.push(c),
            None => warn!(row = %row, "skipping malformed kline row"),
        }
    }
    Ok(closes)
}

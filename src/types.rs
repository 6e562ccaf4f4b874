// =============================================================================
// Shared types used across the Aurora Pulse engine
// =============================================================================

use std::borrow::Borrow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Exchange symbol identifying a single instrument (e.g. `BTCUSDT`).
///
/// Normalised to upper case on construction so that symbols coming from the
/// discovery feed, the API and inbound frames all compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Instrument {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Instrument {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Candle sampling interval, named after the exchange's kline interval tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Hour8,
    Day1,
    Week1,
    Month1,
}

impl Default for KlineInterval {
    fn default() -> Self {
        Self::Min15
    }
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 10] = [
        Self::Min1,
        Self::Min5,
        Self::Min15,
        Self::Min30,
        Self::Hour1,
        Self::Hour4,
        Self::Hour8,
        Self::Day1,
        Self::Week1,
        Self::Month1,
    ];

    /// Tag used inside stream topics and inbound candle frames.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Min1 => "Min1",
            Self::Min5 => "Min5",
            Self::Min15 => "Min15",
            Self::Min30 => "Min30",
            Self::Hour1 => "Hour1",
            Self::Hour4 => "Hour4",
            Self::Hour8 => "Hour8",
            Self::Day1 => "Day1",
            Self::Week1 => "Week1",
            Self::Month1 => "Month1",
        }
    }

    /// Interval string accepted by the REST klines endpoint, if there is one.
    pub fn rest_interval(self) -> Option<&'static str> {
        match self {
            Self::Min1 => Some("1m"),
            Self::Min5 => Some("5m"),
            Self::Min15 => Some("15m"),
            Self::Min30 => Some("30m"),
            Self::Hour1 => Some("60m"),
            Self::Hour4 => Some("4h"),
            Self::Hour8 => None,
            Self::Day1 => Some("1d"),
            Self::Week1 => Some("1W"),
            Self::Month1 => Some("1M"),
        }
    }
}

impl std::fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for KlineInterval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|iv| iv.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownInterval(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_is_normalised() {
        assert_eq!(Instrument::new(" btcusdt "), Instrument::new("BTCUSDT"));
        assert_eq!(Instrument::new("ethusdt").as_str(), "ETHUSDT");
    }

    #[test]
    fn interval_parses_case_insensitively() {
        assert_eq!("hour4".parse::<KlineInterval>().unwrap(), KlineInterval::Hour4);
        assert_eq!("Min15".parse::<KlineInterval>().unwrap(), KlineInterval::Min15);
        assert!("3m".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn interval_serialises_as_tag() {
        let json = serde_json::to_string(&KlineInterval::Week1).unwrap();
        assert_eq!(json, "\"Week1\"");
        for iv in KlineInterval::ALL {
            assert_eq!(iv.to_string(), iv.tag());
        }
    }

    #[test]
    fn hour8_has_no_rest_interval() {
        assert_eq!(KlineInterval::Hour8.rest_interval(), None);
        assert_eq!(KlineInterval::Hour1.rest_interval(), Some("60m"));
    }
}

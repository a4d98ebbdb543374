//! Shared types for the ODDSBAND bot.
//!
//! These types form the data model used across all modules.
//! Platform, strategy, storage and engine modules depend on them
//! without depending on each other.

use chrono::{DateTime, Local, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Convert a gateway float into a `Decimal`, rounding to the nearest
/// representable value. Non-finite input maps to zero.
pub fn d(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// One tradable race market, as produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// Exchange market identifier (e.g. Betfair `1.234567890`).
    pub event_id: String,
    /// Exchange/venue the market lives on (1 = UK exchange).
    pub exchange_id: u32,
    /// Race name, e.g. "2m Hcap Hrd".
    pub name: String,
    /// Track (meeting) name, matched against the band catalog.
    pub track: String,
    pub start_time: DateTime<Utc>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} - {} [{}]",
            self.start_time.with_timezone(&Local).format("%H:%M"),
            self.track,
            self.name,
            self.event_id,
        )
    }
}

impl Market {
    /// Helper to build a test/sample market with sensible defaults.
    #[cfg(test)]
    pub fn sample(track: &str) -> Self {
        Market {
            event_id: "1.234567890".to_string(),
            exchange_id: 1,
            name: "2m Hcap Hrd".to_string(),
            track: track.to_string(),
            start_time: Utc::now() + chrono::Duration::minutes(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Live data
// ---------------------------------------------------------------------------

/// Per-runner live state, re-fetched on every poll.
///
/// The market-level flags are repeated on every runner so a single
/// quote is enough to read market status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub selection_id: u64,
    pub selection_name: String,
    pub closed: bool,
    pub in_play: bool,
    /// Live Betfair SP estimate (actual SP once reconciled).
    pub sp_price: Option<Decimal>,
}

/// One rung of an exchange price ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Depth-of-market snapshot for one runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSelection {
    pub selection_id: u64,
    pub selection_name: String,
    pub actual_sp: Option<Decimal>,
    pub available_to_back: Vec<PriceLevel>,
    pub available_to_lay: Vec<PriceLevel>,
}

impl DepthSelection {
    /// Total stake waiting on both sides of the ladder.
    pub fn total_available(&self) -> Decimal {
        self.available_to_back
            .iter()
            .chain(self.available_to_lay.iter())
            .map(|level| level.size)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Bet direction on an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetSide {
    Back,
}

impl fmt::Display for BetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetSide::Back => write!(f, "BACK"),
        }
    }
}

/// A single order submitted through a `MarketGateway`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Position of the runner in the depth snapshot.
    pub entrant_index: usize,
    pub selection_id: u64,
    pub side: BetSide,
    pub price: Decimal,
    pub stake: Decimal,
}

// ---------------------------------------------------------------------------
// Bet records
// ---------------------------------------------------------------------------

/// One placed bet, as persisted to the bet log.
///
/// Field names follow the on-disk camelCase layout; the PascalCase
/// names written by older versions of the log are accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRecord {
    #[serde(alias = "Track")]
    pub track: String,
    #[serde(alias = "OddsBand")]
    pub odds_band: String,
    #[serde(alias = "SelectionName")]
    pub selection_name: String,
    #[serde(alias = "BetPrice")]
    pub bet_price: Decimal,
    #[serde(alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Gateway bet reference. Empty when the order was rejected.
    #[serde(alias = "BetReference", default, deserialize_with = "null_as_empty")]
    pub bet_reference: String,
}

/// Older logs wrote `null` for a missing reference.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl fmt::Display for BetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reference = if self.bet_reference.is_empty() {
            "no reference"
        } else {
            self.bet_reference.as_str()
        };
        write!(
            f,
            "{} - {} @ SP {} (band {}) [{}]",
            self.track, self.selection_name, self.bet_price, self.odds_band, reference,
        )
    }
}

impl BetRecord {
    /// Whether the gateway accepted the order (returned a reference).
    pub fn is_confirmed(&self) -> bool {
        !self.bet_reference.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for ODDSBAND.
#[derive(Debug, thiserror::Error)]
pub enum OddsBandError {
    #[error("Gateway error ({operation}): {message}")]
    Gateway { operation: String, message: String },

    #[error("Failed to open market {market}: {reason}")]
    OpenMarket { market: String, reason: String },

    #[error("No price data returned for market {0}")]
    NoPriceData(String),

    #[error("Market {market} not in-play after {waited_secs}s")]
    InPlayTimeout { market: String, waited_secs: u64 },

    #[error("Invalid odds band '{token}': {reason}")]
    InvalidBand { token: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_record() -> BetRecord {
        BetRecord {
            track: "Ascot (GB)".to_string(),
            odds_band: "2.0-4.0".to_string(),
            selection_name: "Frankel".to_string(),
            bet_price: dec!(3.5),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 16, 14, 30, 0).unwrap(),
            bet_reference: "345678901".to_string(),
        }
    }

    #[test]
    fn test_d_conversion() {
        assert_eq!(d(3.5), dec!(3.5));
        assert_eq!(d(2.1), dec!(2.1));
        assert_eq!(d(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_bet_side_display() {
        assert_eq!(BetSide::Back.to_string(), "BACK");
    }

    #[test]
    fn test_bet_record_serializes_camel_case() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["track"], "Ascot (GB)");
        assert_eq!(json["oddsBand"], "2.0-4.0");
        assert_eq!(json["selectionName"], "Frankel");
        assert_eq!(json["betPrice"], 3.5);
        assert_eq!(json["betReference"], "345678901");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_bet_record_reads_legacy_field_names() {
        let legacy = r#"{
            "Track": "Newbury",
            "OddsBand": "5.0-8.0",
            "SelectionName": "Sea The Stars",
            "BetPrice": 6.2,
            "Timestamp": "2026-10-15T13:05:00Z",
            "BetReference": ""
        }"#;
        let record: BetRecord = serde_json::from_str(legacy).unwrap();
        assert_eq!(record.track, "Newbury");
        assert_eq!(record.bet_price, dec!(6.2));
        assert!(!record.is_confirmed());
    }

    #[test]
    fn test_bet_record_accepts_null_reference() {
        let legacy = r#"{
            "Track": "York",
            "OddsBand": "5.0-8.0",
            "SelectionName": "Unplaced",
            "BetPrice": 6.4,
            "Timestamp": "2026-09-30T15:10:00Z",
            "BetReference": null
        }"#;
        let record: BetRecord = serde_json::from_str(legacy).unwrap();
        assert_eq!(record.bet_reference, "");
        assert!(!record.is_confirmed());
    }

    #[test]
    fn test_bet_record_display_without_reference() {
        let mut record = sample_record();
        record.bet_reference.clear();
        assert!(record.to_string().contains("no reference"));
        assert!(sample_record().is_confirmed());
    }

    #[test]
    fn test_depth_total_available() {
        let depth = DepthSelection {
            selection_id: 1,
            selection_name: "A".into(),
            actual_sp: None,
            available_to_back: vec![PriceLevel { price: dec!(3.4), size: dec!(10) }],
            available_to_lay: vec![
                PriceLevel { price: dec!(3.6), size: dec!(5) },
                PriceLevel { price: dec!(3.7), size: dec!(2.5) },
            ],
        };
        assert_eq!(depth.total_available(), dec!(17.5));
    }

    #[test]
    fn test_market_display_contains_track_and_race() {
        let market = Market::sample("Newbury");
        let shown = market.to_string();
        assert!(shown.contains("Newbury"));
        assert!(shown.contains("2m Hcap Hrd"));
        assert!(shown.contains("1.234567890"));
    }

    #[test]
    fn test_error_display() {
        let err = OddsBandError::InPlayTimeout {
            market: "1.2".into(),
            waited_secs: 60,
        };
        assert_eq!(err.to_string(), "Market 1.2 not in-play after 60s");
    }
}

//! Odds bands and the per-track band catalog.
//!
//! The catalog file maps a track-name fragment to the SP ranges that
//! have historically shown a positive difference at that track:
//!
//! ```json
//! { "ascot": ["2.0-4.0", "6.0-8.0"], "newbury": ["3.0-5.5"] }
//! ```
//!
//! Matching is case-insensitive substring containment, and the first
//! fragment in file order wins.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::types::OddsBandError;

// ---------------------------------------------------------------------------
// PriceBand
// ---------------------------------------------------------------------------

/// An inclusive SP range `[lower, upper]` parsed from a `"lower-upper"` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceBand {
    pub lower: Decimal,
    pub upper: Decimal,
    /// The token exactly as written in the catalog (used as the log key).
    pub token: String,
}

impl PriceBand {
    /// Whether `price` falls inside the band, both ends inclusive.
    pub fn contains(&self, price: Decimal) -> bool {
        self.lower <= price && price <= self.upper
    }
}

impl FromStr for PriceBand {
    type Err = OddsBandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| OddsBandError::InvalidBand {
            token: s.to_string(),
            reason: reason.to_string(),
        };

        let (lower, upper) = s
            .split_once('-')
            .ok_or_else(|| invalid("expected 'lower-upper'"))?;
        let lower = Decimal::from_str(lower.trim())
            .map_err(|_| invalid("lower bound is not a number"))?;
        let upper = Decimal::from_str(upper.trim())
            .map_err(|_| invalid("upper bound is not a number"))?;

        if lower > upper {
            return Err(invalid("lower bound exceeds upper bound"));
        }

        Ok(Self {
            lower,
            upper,
            token: s.to_string(),
        })
    }
}

impl fmt::Display for PriceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

// ---------------------------------------------------------------------------
// BandCatalog
// ---------------------------------------------------------------------------

/// One catalog entry: a lowercase track fragment and its bands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub fragment: String,
    pub bands: Vec<PriceBand>,
}

/// Immutable fragment → bands mapping, shared read-only by all monitors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandCatalog {
    entries: Vec<CatalogEntry>,
}

impl BandCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Load the catalog from disk. Never fails: a missing or malformed
    /// file is logged and yields an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            warn!(path = %path.display(), "Band catalog file not found, no bands loaded");
            return Self::default();
        }

        let loaded = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read band catalog {}", path.display()))
            .and_then(|json| Self::from_json_str(&json));

        match loaded {
            Ok(catalog) => {
                info!(
                    path = %path.display(),
                    tracks = catalog.len(),
                    "Band catalog loaded"
                );
                catalog
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Band catalog unusable, no bands loaded");
                Self::default()
            }
        }
    }

    /// Parse a catalog from its JSON text, preserving file order.
    ///
    /// Invalid band tokens are dropped (with a warning) rather than
    /// failing the whole catalog.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: Map<String, Value> =
            serde_json::from_str(json).context("Band catalog must be a JSON object")?;

        let mut entries = Vec::with_capacity(raw.len());
        for (fragment, value) in raw {
            let tokens: Vec<String> = serde_json::from_value(value)
                .with_context(|| format!("Bands for '{fragment}' must be an array of strings"))?;

            let bands = tokens
                .iter()
                .filter_map(|token| match token.parse::<PriceBand>() {
                    Ok(band) => Some(band),
                    Err(e) => {
                        warn!(fragment = %fragment, error = %e, "Skipping invalid odds band");
                        None
                    }
                })
                .collect();

            entries.push(CatalogEntry {
                fragment: fragment.to_lowercase(),
                bands,
            });
        }

        debug!(entries = entries.len(), "Band catalog parsed");
        Ok(Self::new(entries))
    }

    /// The entry of the first fragment contained in `track`
    /// (case-insensitive), if any. At most one entry is ever used.
    pub fn entry_for(&self, track: &str) -> Option<&CatalogEntry> {
        let normalized = track.to_lowercase();
        self.entries
            .iter()
            .find(|entry| normalized.contains(entry.fragment.as_str()))
    }

    /// The bands of the first matching entry for `track`.
    pub fn bands_for(&self, track: &str) -> Option<&[PriceBand]> {
        self.entry_for(track).map(|entry| entry.bands.as_slice())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

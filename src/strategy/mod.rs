//! Band-matching strategy.
//!
//! Joins the depth-of-market snapshot with the live price snapshot and
//! emits one `BandMatch` for every (runner, band) pair whose observed SP
//! falls inside the band. Overlapping bands are not deduplicated: a
//! runner inside two bands yields two matches.

pub mod bands;

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{DepthSelection, PriceQuote};
use bands::PriceBand;

/// A runner whose observed SP fell inside one configured band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandMatch {
    /// Position of the runner in the depth snapshot.
    pub entrant_index: usize,
    pub selection_id: u64,
    pub selection_name: String,
    pub price: Decimal,
    pub band: PriceBand,
}

/// Evaluate a point-in-time snapshot against `bands`.
///
/// Runners missing from either snapshot are skipped. The observed price
/// is the depth runner's actual SP, falling back to the quote's SP
/// estimate; runners with neither are skipped. Results are ordered by
/// depth position, then by band order.
pub fn find_matches(
    depth: &[DepthSelection],
    quotes: &[PriceQuote],
    bands: &[PriceBand],
) -> Vec<BandMatch> {
    let quotes_by_id: HashMap<u64, &PriceQuote> =
        quotes.iter().map(|q| (q.selection_id, q)).collect();

    let mut matches = Vec::new();

    for (index, runner) in depth.iter().enumerate() {
        let Some(quote) = quotes_by_id.get(&runner.selection_id) else {
            debug!(selection_id = runner.selection_id, "Runner missing from price snapshot");
            continue;
        };

        let Some(price) = runner.actual_sp.or(quote.sp_price) else {
            debug!(selection_id = runner.selection_id, "Runner has no SP yet");
            continue;
        };

        let name = if quote.selection_name.is_empty() {
            &runner.selection_name
        } else {
            &quote.selection_name
        };

        for band in bands.iter().filter(|band| band.contains(price)) {
            matches.push(BandMatch {
                entrant_index: index,
                selection_id: runner.selection_id,
                selection_name: name.clone(),
                price,
                band: band.clone(),
            });
        }
    }

    matches
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Persistence layer.
//!
//! Bets are persisted to a JSON file grouped as
//! `track → odds band → [BetRecord]`. Every flush is a read-merge-write:
//! the existing file is read, the new records are appended under their
//! track/band, and the result is written back. Writers are serialised
//! through a single `BetLogStore` so two markets finishing together
//! cannot clobber each other's merge.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info};

use crate::types::{BetRecord, OddsBandError};

/// Default bet log file path.
pub const DEFAULT_BET_LOG_FILE: &str = "BetfairBetsLog.json";

/// On-disk layout: track → odds band → records.
pub type BetLog = BTreeMap<String, BTreeMap<String, Vec<BetRecord>>>;

// ---------------------------------------------------------------------------
// BetLogStore
// ---------------------------------------------------------------------------

/// Single-writer handle to the persisted bet log.
///
/// Share one instance (behind an `Arc`) between all monitors writing
/// to the same file.
#[derive(Debug)]
pub struct BetLogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BetLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge `records` into the log on disk.
    ///
    /// The merge works on the raw JSON tree, so existing entries are
    /// written back exactly as found even when they predate the current
    /// record layout. A missing file starts an empty log. An unreadable
    /// or corrupt file is left untouched and the write is skipped.
    pub fn append(&self, records: &[BetRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut log = self.read_raw()?;
        for record in records {
            let value = serde_json::to_value(record).context("Failed to serialise bet record")?;

            let track = log
                .entry(record.track.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(bands) = track else {
                return Err(self.corrupt(format!("entry '{}' is not an object", record.track)));
            };

            let band = bands
                .entry(record.odds_band.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(bets) = band else {
                return Err(self.corrupt(format!(
                    "entry '{}/{}' is not an array",
                    record.track, record.odds_band
                )));
            };

            bets.push(value);
        }

        let json = serde_json::to_string_pretty(&log).context("Failed to serialise bet log")?;

        // Write-then-rename so a crash mid-write never truncates the log.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write bet log to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace bet log {}", self.path.display()))?;

        debug!(path = %self.path.display(), added = records.len(), "Bet log written");
        Ok(records.len())
    }

    /// Read the full log. A missing file is an empty log.
    pub fn load(&self) -> Result<BetLog> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.read_log()
    }

    fn read_log(&self) -> Result<BetLog> {
        let raw = self.read_raw()?;
        serde_json::from_value(Value::Object(raw)).map_err(|e| self.corrupt(e.to_string()))
    }

    fn read_raw(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read bet log {}", self.path.display()))?;

        if json.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&json).map_err(|e| self.corrupt(e.to_string()))
    }

    fn corrupt(&self, reason: String) -> anyhow::Error {
        OddsBandError::Storage(format!("bet log {} is corrupt: {reason}", self.path.display()))
            .into()
    }
}

// ---------------------------------------------------------------------------
// BetLedger
// ---------------------------------------------------------------------------

/// In-memory, append-only collection of the bets placed on one market.
#[derive(Debug, Default)]
pub struct BetLedger {
    records: Vec<BetRecord>,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: BetRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[BetRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persist the collected records and empty the ledger.
    ///
    /// The drained records are returned whether or not the write
    /// succeeded; a failed write is logged and otherwise ignored.
    pub fn flush_and_clear(&mut self, store: &BetLogStore) -> Vec<BetRecord> {
        let records = std::mem::take(&mut self.records);

        if records.is_empty() {
            debug!("No bets to flush");
            return records;
        }

        match store.append(&records) {
            Ok(count) => info!(
                path = %store.path().display(),
                count,
                "All bets logged"
            ),
            Err(e) => error!(
                path = %store.path().display(),
                error = %e,
                "Error writing bet log, bets not persisted"
            ),
        }

        records
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("oddsband_test_log_{}.json", uuid::Uuid::new_v4()));
        p
    }

    fn record(track: &str, band: &str, name: &str) -> BetRecord {
        BetRecord {
            track: track.to_string(),
            odds_band: band.to_string(),
            selection_name: name.to_string(),
            bet_price: dec!(3.5),
            timestamp: Utc::now(),
            bet_reference: "ref-1".to_string(),
        }
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_append_creates_missing_file() {
        let path = temp_path();
        let store = BetLogStore::new(&path);

        let written = store.append(&[record("Ascot", "2.0-4.0", "A")]).unwrap();
        assert_eq!(written, 1);

        let log = store.load().unwrap();
        assert_eq!(log["Ascot"]["2.0-4.0"].len(), 1);
        assert_eq!(log["Ascot"]["2.0-4.0"][0].selection_name, "A");

        cleanup(&path);
    }

    #[test]
    fn test_append_preserves_unrelated_entries() {
        let path = temp_path();
        let store = BetLogStore::new(&path);

        store.append(&[record("York", "5.0-8.0", "Old")]).unwrap();
        store.append(&[record("Ascot", "2.0-4.0", "New")]).unwrap();

        let log = store.load().unwrap();
        assert_eq!(log["York"]["5.0-8.0"].len(), 1);
        assert_eq!(log["York"]["5.0-8.0"][0].selection_name, "Old");
        assert_eq!(log["Ascot"]["2.0-4.0"][0].selection_name, "New");

        cleanup(&path);
    }

    #[test]
    fn test_append_extends_existing_band() {
        let path = temp_path();
        let store = BetLogStore::new(&path);

        store.append(&[record("Ascot", "2.0-4.0", "First")]).unwrap();
        store.append(&[record("Ascot", "2.0-4.0", "Second")]).unwrap();

        let log = store.load().unwrap();
        let names: Vec<_> = log["Ascot"]["2.0-4.0"]
            .iter()
            .map(|r| r.selection_name.as_str())
            .collect();
        assert_eq!(names, vec!["First", "Second"]);

        cleanup(&path);
    }

    #[test]
    fn test_append_merges_into_legacy_file() {
        let path = temp_path();
        std::fs::write(
            &path,
            r#"{"Newbury": {"5.0-8.0": [{
                "Track": "Newbury", "OddsBand": "5.0-8.0", "SelectionName": "Legacy",
                "BetPrice": 6.0, "Timestamp": "2026-10-01T12:00:00Z", "BetReference": "9"
            }]}}"#,
        )
        .unwrap();

        let store = BetLogStore::new(&path);
        store.append(&[record("Newbury", "2.0-4.0", "Fresh")]).unwrap();

        let log = store.load().unwrap();
        assert_eq!(log["Newbury"]["5.0-8.0"][0].selection_name, "Legacy");
        assert_eq!(log["Newbury"]["2.0-4.0"][0].selection_name, "Fresh");

        cleanup(&path);
    }

    #[test]
    fn test_append_keeps_odd_legacy_records_verbatim() {
        let path = temp_path();
        let legacy = serde_json::json!({
            "York": {"5.0-8.0": [{
                "Track": "York", "OddsBand": "5.0-8.0", "SelectionName": "Unplaced",
                "BetPrice": 6.4, "Timestamp": "2026-09-30T15:10:00", "BetReference": null
            }]}
        });
        std::fs::write(&path, serde_json::to_string(&legacy).unwrap()).unwrap();

        let store = BetLogStore::new(&path);
        let mut ledger = BetLedger::new();
        ledger.add(record("Ascot", "2.0-4.0", "A"));
        assert_eq!(ledger.flush_and_clear(&store).len(), 1);

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["York"], legacy["York"]);
        assert_eq!(on_disk["Ascot"]["2.0-4.0"][0]["selectionName"], "A");
        assert_eq!(on_disk["Ascot"]["2.0-4.0"][0]["betReference"], "ref-1");

        cleanup(&path);
    }

    #[test]
    fn test_append_rejects_misshapen_track_entry() {
        let path = temp_path();
        std::fs::write(&path, r#"{"Ascot": "not a band map"}"#).unwrap();

        let store = BetLogStore::new(&path);
        assert!(store.append(&[record("Ascot", "2.0-4.0", "A")]).is_err());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"Ascot": "not a band map"}"#
        );

        cleanup(&path);
    }

    #[test]
    fn test_corrupt_file_is_not_overwritten() {
        let path = temp_path();
        std::fs::write(&path, "{ definitely not json").unwrap();

        let store = BetLogStore::new(&path);
        assert!(store.append(&[record("Ascot", "2.0-4.0", "A")]).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ definitely not json");

        cleanup(&path);
    }

    #[test]
    fn test_append_empty_is_noop() {
        let path = temp_path();
        let store = BetLogStore::new(&path);
        assert_eq!(store.append(&[]).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let path = temp_path();
        let store = Arc::new(BetLogStore::new(&path));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let track = format!("Track {i}");
                    store.append(&[record(&track, "2.0-4.0", "A")]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = store.load().unwrap();
        assert_eq!(log.len(), 8);

        cleanup(&path);
    }

    #[test]
    fn test_ledger_flush_clears_and_returns_records() {
        let path = temp_path();
        let store = BetLogStore::new(&path);
        let mut ledger = BetLedger::new();

        ledger.add(record("Ascot", "2.0-4.0", "A"));
        ledger.add(record("Ascot", "6.0-8.0", "B"));
        assert_eq!(ledger.len(), 2);

        let flushed = ledger.flush_and_clear(&store);
        assert_eq!(flushed.len(), 2);
        assert!(ledger.is_empty());

        let log = store.load().unwrap();
        assert_eq!(log["Ascot"].len(), 2);

        cleanup(&path);
    }

    #[test]
    fn test_ledger_flush_returns_records_even_when_write_fails() {
        let path = temp_path();
        std::fs::write(&path, "garbage").unwrap();
        let store = BetLogStore::new(&path);

        let mut ledger = BetLedger::new();
        ledger.add(record("Ascot", "2.0-4.0", "A"));

        let flushed = ledger.flush_and_clear(&store);
        assert_eq!(flushed.len(), 1);
        assert!(ledger.records().is_empty());

        cleanup(&path);
    }

    #[test]
    fn test_empty_ledger_flush_writes_nothing() {
        let path = temp_path();
        let store = BetLogStore::new(&path);
        let mut ledger = BetLedger::new();

        assert!(ledger.flush_and_clear(&store).is_empty());
        assert!(!path.exists());
    }
}

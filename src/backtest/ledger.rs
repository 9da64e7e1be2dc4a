//! Append-only backtest ledger.
//!
//! One JSONL row per (game, as-of date) pairing of model probability against
//! the closing market. Rows are written once and never rewritten: this is
//! the audit trail calibration analysis runs over.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::GameId;
use crate::error::{Result, RunlineError};

/// One walk-forward comparison of model vs market for one game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub game_id: GameId,
    /// Validation date the prediction was made for
    pub as_of: NaiveDate,
    /// Fit date of the posterior that produced the prediction
    pub fit_date: NaiveDate,
    pub model_prob_home: f64,
    /// Devigged closing fair; None when the market was infeasible (excluded
    /// from comparison, never estimated)
    pub market_fair_home: Option<f64>,
    /// Closing payout multipliers used for ROI accounting
    pub home_decimal_odds: Option<f64>,
    pub away_decimal_odds: Option<f64>,
    pub realized_home_win: bool,
    pub edge_home: Option<f64>,
    /// Whether the detector's threshold would have flagged a bet
    pub flagged: bool,
    /// Did the flagged bet win (None when nothing was flagged)
    pub flagged_won: Option<bool>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only JSONL ledger
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. The file is opened in append mode every time;
    /// existing rows are never touched.
    pub fn append(&self, record: &BacktestRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read the full ledger back for analysis
    pub fn read_all(&self) -> Result<Vec<BacktestRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: BacktestRecord = serde_json::from_str(&line).map_err(|e| {
                RunlineError::Ledger(format!("bad ledger row {}: {}", i + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(game_id: GameId, day: u32) -> BacktestRecord {
        BacktestRecord {
            game_id,
            as_of: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            fit_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            model_prob_home: 0.55,
            market_fair_home: Some(0.52),
            home_decimal_odds: Some(1.91),
            away_decimal_odds: Some(1.95),
            realized_home_win: true,
            edge_home: Some(0.03),
            flagged: false,
            flagged_won: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let path = format!("/tmp/runline_ledger_{}.jsonl", std::process::id());
        let ledger = Ledger::new(&path);
        ledger.append(&record(1, 1)).unwrap();
        ledger.append(&record(2, 1)).unwrap();
        ledger.append(&record(3, 2)).unwrap();

        let rows = ledger.read_all().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].game_id, 1);
        assert_eq!(rows[2].as_of, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_ledger_reads_empty() {
        let ledger = Ledger::new("/tmp/runline_ledger_nonexistent.jsonl");
        assert!(ledger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_appends_accumulate_across_handles() {
        let path = format!("/tmp/runline_ledger_reopen_{}.jsonl", std::process::id());
        Ledger::new(&path).append(&record(1, 1)).unwrap();
        // A second handle must not clobber the first row
        Ledger::new(&path).append(&record(2, 2)).unwrap();
        assert_eq!(Ledger::new(&path).read_all().unwrap().len(), 2);
        std::fs::remove_file(&path).ok();
    }
}

//! File-backed state: posterior snapshots and resumable checkpoints.
//!
//! Posterior stores are versioned by fit date and written once; a failed
//! refit never touches the snapshot directory, so the previous store stays
//! live. Checkpoints let a long-running backfill pause on quota exhaustion
//! and resume without recomputation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RunlineError};
use crate::model::posterior::PosteriorStore;

/// Trait for components that can checkpoint their progress
pub trait Checkpointable {
    /// Stable identifier used as the checkpoint file stem
    fn checkpoint_name(&self) -> &str;

    fn to_checkpoint(&self) -> serde_json::Value;

    fn restore(&mut self, data: &serde_json::Value) -> Result<()>;
}

/// Directory of posterior snapshots and checkpoints
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn posterior_path(&self, fit_date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("posterior_{}.json", fit_date.format("%Y%m%d")))
    }

    /// Persist a converged posterior store, versioned by its fit date
    pub fn save_posterior(&self, store: &PosteriorStore) -> Result<PathBuf> {
        let path = self.posterior_path(store.fit_date);
        let json = serde_json::to_string(store)?;
        fs::write(&path, json)?;
        info!(fit_date = %store.fit_date, path = %path.display(), "saved posterior snapshot");
        Ok(path)
    }

    pub fn load_posterior(&self, fit_date: NaiveDate) -> Result<PosteriorStore> {
        let path = self.posterior_path(fit_date);
        let json = fs::read_to_string(&path).map_err(|e| {
            RunlineError::Snapshot(format!("no snapshot for {}: {}", fit_date, e))
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Most recent snapshot by fit date, if any
    pub fn latest_posterior(&self) -> Result<Option<PosteriorStore>> {
        let mut latest: Option<(NaiveDate, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stamp) = name
                .strip_prefix("posterior_")
                .and_then(|s| s.strip_suffix(".json"))
            {
                if let Ok(date) = NaiveDate::parse_from_str(stamp, "%Y%m%d") {
                    if latest.as_ref().map(|(d, _)| date > *d).unwrap_or(true) {
                        latest = Some((date, entry.path()));
                    }
                }
            }
        }
        match latest {
            Some((_, path)) => {
                let json = fs::read_to_string(path)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("checkpoint_{}.json", name))
    }

    pub fn save_checkpoint<T: Checkpointable>(&self, component: &T) -> Result<()> {
        let path = self.checkpoint_path(component.checkpoint_name());
        fs::write(&path, serde_json::to_string(&component.to_checkpoint())?)?;
        debug!(path = %path.display(), "saved checkpoint");
        Ok(())
    }

    /// Restore a component from its checkpoint; Ok(false) when none exists
    pub fn restore_checkpoint<T: Checkpointable>(&self, component: &mut T) -> Result<bool> {
        let path = self.checkpoint_path(component.checkpoint_name());
        if !path.exists() {
            return Ok(false);
        }
        let data: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        component.restore(&data)?;
        Ok(true)
    }

    pub fn clear_checkpoint(&self, name: &str) -> Result<()> {
        let path = self.checkpoint_path(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Walk-forward backfill progress: dates fully ledgered so far
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillCheckpoint {
    pub completed_dates: Vec<NaiveDate>,
}

impl BackfillCheckpoint {
    pub fn is_done(&self, date: NaiveDate) -> bool {
        self.completed_dates.contains(&date)
    }

    pub fn mark_done(&mut self, date: NaiveDate) {
        if !self.is_done(date) {
            self.completed_dates.push(date);
        }
    }
}

impl Checkpointable for BackfillCheckpoint {
    fn checkpoint_name(&self) -> &str {
        "walkforward_backfill"
    }

    fn to_checkpoint(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("checkpoint serializes")
    }

    fn restore(&mut self, data: &serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(data.clone())?;
        Ok(())
    }
}

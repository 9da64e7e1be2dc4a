//! Explicit quota context for the external market feed.
//!
//! The feed itself lives outside this crate, but its budget bounds our
//! inputs. The budget is a plain context object passed into every ingest
//! call — never process-wide mutable state — so retries and parallel callers
//! cannot race on it. Exhaustion is a pausable condition: callers checkpoint
//! partial progress and resume in the next window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunlineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaBudget {
    pub remaining: u32,
    pub used: u32,
    pub last_request: Option<DateTime<Utc>>,
}

impl QuotaBudget {
    pub fn new(remaining: u32) -> Self {
        Self {
            remaining,
            used: 0,
            last_request: None,
        }
    }

    /// Spend `cost` requests from the budget.
    ///
    /// Fails with `QuotaExhausted` without spending anything when the
    /// budget cannot cover the cost.
    pub fn consume(&mut self, cost: u32) -> Result<()> {
        if cost > self.remaining {
            return Err(RunlineError::QuotaExhausted {
                used: self.used,
                requested: cost,
            });
        }
        self.remaining -= cost;
        self.used += cost;
        self.last_request = Some(Utc::now());
        Ok(())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Refill at the start of a new quota window
    pub fn refill(&mut self, remaining: u32) {
        self.remaining = remaining;
    }
}

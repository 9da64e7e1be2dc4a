//! Game observations: full run-event records and score-only results.
//!
//! A `FullRunEvent` carries, per side, the number of plays that scored
//! exactly 1, 2, 3, and 4-or-more runs. The counts must reconcile to the
//! final score; records that fail the check are excluded from fitting and
//! logged for manual review, never auto-corrected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::ids::{GameId, PitcherId, Season, TeamId};
use crate::error::{Result, RunlineError};

/// Plays scoring exactly 1, 2, 3, and >=4 runs for one side of one game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEventCounts {
    pub run1: u32,
    pub run2: u32,
    pub run3: u32,
    pub run4: u32,
}

impl RunEventCounts {
    /// Score implied by the counts: 1*run1 + 2*run2 + 3*run3 + 4*run4.
    /// Plays of >=4 runs are carried at weight 4.
    pub fn implied_score(&self) -> u32 {
        self.run1 + 2 * self.run2 + 3 * self.run3 + 4 * self.run4
    }

    /// Count for a single event magnitude (1-based, 4 = four-plus)
    pub fn count(&self, magnitude: usize) -> u32 {
        match magnitude {
            1 => self.run1,
            2 => self.run2,
            3 => self.run3,
            4 => self.run4,
            _ => 0,
        }
    }
}

/// One side of a full run-event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEvents {
    pub team_id: TeamId,
    /// 0 = unknown starter (falls back to team-level pitching mean)
    pub starting_pitcher_id: PitcherId,
    pub events: RunEventCounts,
    pub final_score: u32,
}

/// A game with per-side run-event detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullRunEventGame {
    pub game_id: GameId,
    pub season: Season,
    pub game_date: NaiveDate,
    pub neutral_site: bool,
    pub home: SideEvents,
    pub away: SideEvents,
}

impl FullRunEventGame {
    /// Check the reconciliation invariant on both sides.
    ///
    /// A violation is a fatal per-record integrity error: the record is
    /// excluded from fitting, not repaired.
    pub fn validate(&self) -> Result<()> {
        for (label, side) in [("home", &self.home), ("away", &self.away)] {
            let implied = side.events.implied_score();
            if implied != side.final_score {
                return Err(RunlineError::DataIntegrity {
                    game_id: self.game_id,
                    reason: format!(
                        "{} run events imply {} runs but final score is {}",
                        label, implied, side.final_score
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn winner_home(&self) -> bool {
        self.home.final_score > self.away.final_score
    }
}

/// A game where only the final score survived ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreOnlyGame {
    pub game_id: GameId,
    pub season: Season,
    pub game_date: NaiveDate,
    pub neutral_site: bool,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_score: u32,
    pub away_score: u32,
}

impl ScoreOnlyGame {
    pub fn winner_home(&self) -> bool {
        self.home_score > self.away_score
    }
}

/// Tagged variant over the two observation shapes.
///
/// The model and validator handle each variant explicitly; there is no ad hoc
/// shape inspection anywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameObservation {
    FullRunEvent(FullRunEventGame),
    ScoreOnly(ScoreOnlyGame),
}

impl GameObservation {
    pub fn game_id(&self) -> GameId {
        match self {
            GameObservation::FullRunEvent(g) => g.game_id,
            GameObservation::ScoreOnly(g) => g.game_id,
        }
    }

    pub fn game_date(&self) -> NaiveDate {
        match self {
            GameObservation::FullRunEvent(g) => g.game_date,
            GameObservation::ScoreOnly(g) => g.game_date,
        }
    }

    pub fn season(&self) -> Season {
        match self {
            GameObservation::FullRunEvent(g) => g.season,
            GameObservation::ScoreOnly(g) => g.season,
        }
    }

    pub fn home_team_id(&self) -> TeamId {
        match self {
            GameObservation::FullRunEvent(g) => g.home.team_id,
            GameObservation::ScoreOnly(g) => g.home_team_id,
        }
    }

    pub fn away_team_id(&self) -> TeamId {
        match self {
            GameObservation::FullRunEvent(g) => g.away.team_id,
            GameObservation::ScoreOnly(g) => g.away_team_id,
        }
    }

    pub fn home_score(&self) -> u32 {
        match self {
            GameObservation::FullRunEvent(g) => g.home.final_score,
            GameObservation::ScoreOnly(g) => g.home_score,
        }
    }

    pub fn away_score(&self) -> u32 {
        match self {
            GameObservation::FullRunEvent(g) => g.away.final_score,
            GameObservation::ScoreOnly(g) => g.away_score,
        }
    }

    pub fn winner_home(&self) -> bool {
        self.home_score() > self.away_score()
    }
}

//! Team and pitcher ability ratings.
//!
//! Ratings are immutable once produced: a refit writes a new version tied to
//! its fit timestamp and supersedes (never mutates) the old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{ConferenceId, PitcherId, Season, TeamId};
use crate::model::likelihood::EVENT_TYPES;

/// Where a rating came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Posterior mean from a converged fit
    Fitted,
    /// Prior Builder seed only; the model treats this as a regularizing
    /// prior, not fixed truth
    PriorOnly,
}

/// Per-event-type attack/defense coefficients for one team-season.
///
/// Coefficient index k corresponds to plays scoring k+1 runs (index 3 is the
/// four-or-more bucket). All coefficients live on the log-rate scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSeasonRating {
    pub team_id: TeamId,
    pub season: Season,
    pub conference_id: ConferenceId,
    pub attack: [f64; EVENT_TYPES],
    pub defense: [f64; EVENT_TYPES],
    pub home_advantage: [f64; EVENT_TYPES],
    pub provenance: Provenance,
    pub fit_timestamp: DateTime<Utc>,
}

impl TeamSeasonRating {
    /// Neutral rating: league-average team, tagged as prior-only
    pub fn neutral(team_id: TeamId, season: Season, conference_id: ConferenceId) -> Self {
        Self {
            team_id,
            season,
            conference_id,
            attack: [0.0; EVENT_TYPES],
            defense: [0.0; EVENT_TYPES],
            home_advantage: [0.0; EVENT_TYPES],
            provenance: Provenance::PriorOnly,
            fit_timestamp: Utc::now(),
        }
    }
}

/// Pitcher ability, hierarchically linked to the parent team by id.
///
/// The link is a foreign key resolved by lookup at simulation time — not an
/// owned reference. Absent pitchers resolve to the team-level pitching mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitcherRating {
    pub pitcher_id: PitcherId,
    pub team_id: TeamId,
    pub season: Season,
    /// Per-event-type suppression coefficient (log-rate scale; negative
    /// suppresses the opposing offense)
    pub ability: [f64; EVENT_TYPES],
    /// Shrinkage weight toward the team pitching mean, in [0, 1];
    /// 1.0 = fully shrunk (no individual sample)
    pub shrinkage_weight: f64,
    pub fit_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_rating_is_prior_only() {
        let r = TeamSeasonRating::neutral(7, 2026, 3);
        assert_eq!(r.provenance, Provenance::PriorOnly);
        assert!(r.attack.iter().all(|&a| a == 0.0));
        assert!(r.defense.iter().all(|&d| d == 0.0));
    }
}

//! Prior Builder: seed strengths for teams entering a new season.
//!
//! Roster continuity drives the seed: a team returning most of its
//! production keeps most of its prior-season rating, the rest regresses to
//! the conference mean. Seeds are tagged `PriorOnly` so the fit treats them
//! as regularizing prior centers, never as fixed truth.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::ids::{ConferenceId, Season, TeamId};
use crate::domain::rating::{Provenance, TeamSeasonRating};
use crate::model::likelihood::EVENT_TYPES;

/// Externally computed roster-continuity signal for one team-season
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturningProduction {
    pub team_id: TeamId,
    pub season: Season,
    pub conference_id: ConferenceId,
    /// Fraction of prior-season production returning, in [0, 1]
    pub fraction: f64,
}

/// Per-conference (and league-wide) mean of prior-season coefficients
#[derive(Debug, Clone)]
pub struct ConferenceMeans {
    by_conference: HashMap<ConferenceId, ([f64; EVENT_TYPES], [f64; EVENT_TYPES])>,
    league: ([f64; EVENT_TYPES], [f64; EVENT_TYPES]),
}

impl ConferenceMeans {
    pub fn from_ratings(prior: &[TeamSeasonRating]) -> Self {
        let mut sums: HashMap<ConferenceId, ([f64; EVENT_TYPES], [f64; EVENT_TYPES], usize)> =
            HashMap::new();
        let mut league_attack = [0.0; EVENT_TYPES];
        let mut league_defense = [0.0; EVENT_TYPES];
        for r in prior {
            let entry = sums
                .entry(r.conference_id)
                .or_insert(([0.0; EVENT_TYPES], [0.0; EVENT_TYPES], 0));
            for k in 0..EVENT_TYPES {
                entry.0[k] += r.attack[k];
                entry.1[k] += r.defense[k];
                league_attack[k] += r.attack[k];
                league_defense[k] += r.defense[k];
            }
            entry.2 += 1;
        }

        let n = prior.len().max(1) as f64;
        for k in 0..EVENT_TYPES {
            league_attack[k] /= n;
            league_defense[k] /= n;
        }

        let by_conference = sums
            .into_iter()
            .map(|(conf, (a, d, count))| {
                let c = count as f64;
                let mut attack = [0.0; EVENT_TYPES];
                let mut defense = [0.0; EVENT_TYPES];
                for k in 0..EVENT_TYPES {
                    attack[k] = a[k] / c;
                    defense[k] = d[k] / c;
                }
                (conf, (attack, defense))
            })
            .collect();

        Self {
            by_conference,
            league: (league_attack, league_defense),
        }
    }

    pub fn for_conference(&self, conf: ConferenceId) -> ([f64; EVENT_TYPES], [f64; EVENT_TYPES]) {
        self.by_conference.get(&conf).copied().unwrap_or(self.league)
    }
}

/// Build seed ratings for a new season.
///
/// `seed = r * prior_rating + (1 - r) * conference_mean`; a team with no
/// prior season (new program) defaults entirely to the conference mean.
pub fn build_seeds(
    season: Season,
    returning: &[ReturningProduction],
    prior_ratings: &[TeamSeasonRating],
) -> Vec<TeamSeasonRating> {
    let means = ConferenceMeans::from_ratings(prior_ratings);
    let by_team: HashMap<TeamId, &TeamSeasonRating> =
        prior_ratings.iter().map(|r| (r.team_id, r)).collect();
    let now = Utc::now();

    returning
        .iter()
        .map(|rp| {
            let r = rp.fraction.clamp(0.0, 1.0);
            let (conf_attack, conf_defense) = means.for_conference(rp.conference_id);
            let mut attack = conf_attack;
            let mut defense = conf_defense;
            let mut home_advantage = [0.0; EVENT_TYPES];

            if let Some(prior) = by_team.get(&rp.team_id) {
                for k in 0..EVENT_TYPES {
                    attack[k] = r * prior.attack[k] + (1.0 - r) * conf_attack[k];
                    defense[k] = r * prior.defense[k] + (1.0 - r) * conf_defense[k];
                }
                home_advantage = prior.home_advantage;
            } else {
                debug!(team_id = rp.team_id, "no prior season; seeding from conference mean");
            }

            TeamSeasonRating {
                team_id: rp.team_id,
                season,
                conference_id: rp.conference_id,
                attack,
                defense,
                home_advantage,
                provenance: Provenance::PriorOnly,
                fit_timestamp: now,
            }
        })
        .collect()
}

//! Sequential Elo baseline.
//!
//! Early in a season the run-event model has nothing to chew on; the Elo
//! baseline only needs final scores, so it consumes both observation
//! variants. It also supplies the prior-season strength signal consumed by
//! the Prior Builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::ids::TeamId;
use crate::domain::observation::GameObservation;

pub const DEFAULT_K: f64 = 32.0;
pub const DEFAULT_INITIAL: f64 = 1500.0;
/// Home bonus in Elo points (~54% home when strengths are equal)
pub const DEFAULT_HOME_ADVANTAGE: f64 = 30.0;
/// Home advantage in log-odds for the prior-only probability (~52% home)
pub const DEFAULT_HOME_ADVANTAGE_LOGIT: f64 = 0.08;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EloRating {
    pub team_id: TeamId,
    pub rating: f64,
    pub n_games: u32,
}

/// Elo table fitted sequentially by date
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EloTable {
    ratings: HashMap<TeamId, EloRating>,
}

impl EloTable {
    pub fn rating(&self, team: TeamId) -> f64 {
        self.ratings
            .get(&team)
            .map(|r| r.rating)
            .unwrap_or(DEFAULT_INITIAL)
    }

    pub fn n_games(&self, team: TeamId) -> u32 {
        self.ratings.get(&team).map(|r| r.n_games).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EloRating> {
        self.ratings.values()
    }
}

/// Expected score for the home team (0-1)
pub fn elo_expected(home_rating: f64, away_rating: f64, home_adv: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((away_rating - (home_rating + home_adv)) / 400.0))
}

/// Fit Elo sequentially over observations sorted by game date.
///
/// Neutral-site games get no home bonus. Ties (possible in suspended games)
/// count as half a win each.
pub fn fit_elo(
    observations: &[GameObservation],
    k: f64,
    initial: f64,
    home_advantage: f64,
) -> EloTable {
    let mut sorted: Vec<&GameObservation> = observations.iter().collect();
    sorted.sort_by_key(|g| (g.game_date(), g.game_id()));

    let mut table = EloTable::default();
    for game in sorted {
        let home = game.home_team_id();
        let away = game.away_team_id();
        let neutral = match game {
            GameObservation::FullRunEvent(g) => g.neutral_site,
            GameObservation::ScoreOnly(g) => g.neutral_site,
        };
        let adv = if neutral { 0.0 } else { home_advantage };

        let r_h = table.rating(home);
        let r_a = table.rating(away);
        let exp_h = elo_expected(r_h, r_a, adv);
        let actual_h = match game.home_score().cmp(&game.away_score()) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Equal => 0.5,
            std::cmp::Ordering::Less => 0.0,
        };

        let upd = |table: &mut EloTable, team: TeamId, initial_rating: f64, delta: f64| {
            let entry = table.ratings.entry(team).or_insert(EloRating {
                team_id: team,
                rating: initial_rating,
                n_games: 0,
            });
            entry.rating += delta;
            entry.n_games += 1;
        };
        upd(&mut table, home, initial, k * (actual_h - exp_h));
        upd(&mut table, away, initial, k * ((1.0 - actual_h) - (1.0 - exp_h)));
    }
    table
}

/// Win probability from Elo ratings; returns (home, away)
pub fn win_prob_from_elo(home_rating: f64, away_rating: f64, home_advantage: f64) -> (f64, f64) {
    let p = elo_expected(home_rating, away_rating, home_advantage);
    (p, 1.0 - p)
}

/// Prior-only win probability before any results exist (home advantage only)
pub fn prior_win_prob(home_advantage_logit: f64) -> (f64, f64) {
    let p_home = 1.0 / (1.0 + (-home_advantage_logit).exp());
    (p_home, 1.0 - p_home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::ScoreOnlyGame;
    use chrono::NaiveDate;

    fn game(id: u64, day: u32, home: TeamId, away: TeamId, hs: u32, aws: u32) -> GameObservation {
        GameObservation::ScoreOnly(ScoreOnlyGame {
            game_id: id,
            season: 2026,
            game_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            neutral_site: false,
            home_team_id: home,
            away_team_id: away,
            home_score: hs,
            away_score: aws,
        })
    }

    #[test]
    fn test_prior_win_prob_slight_home_edge() {
        let (h, a) = prior_win_prob(DEFAULT_HOME_ADVANTAGE_LOGIT);
        assert!((h + a - 1.0).abs() < 1e-12);
        assert!(h > 0.5 && h < 0.53, "h={}", h);
    }

    #[test]
    fn test_winner_gains_loser_drops() {
        let table = fit_elo(&[game(1, 1, 10, 20, 7, 3)], DEFAULT_K, DEFAULT_INITIAL, 0.0);
        assert!(table.rating(10) > DEFAULT_INITIAL);
        assert!(table.rating(20) < DEFAULT_INITIAL);
        // Zero-sum update
        assert!((table.rating(10) + table.rating(20) - 2.0 * DEFAULT_INITIAL).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_wins_separate_ratings() {
        let games: Vec<GameObservation> = (0..10)
            .map(|i| game(i as u64, (i + 1) as u32, 10, 20, 5, 2))
            .collect();
        let table = fit_elo(&games, DEFAULT_K, DEFAULT_INITIAL, DEFAULT_HOME_ADVANTAGE);
        let (p_home, _) = win_prob_from_elo(
            table.rating(10),
            table.rating(20),
            DEFAULT_HOME_ADVANTAGE,
        );
        assert!(p_home > 0.6, "p_home={}", p_home);
        assert_eq!(table.n_games(10), 10);
    }

    #[test]
    fn test_unrated_team_gets_initial() {
        let table = EloTable::default();
        assert_eq!(table.rating(123), DEFAULT_INITIAL);
        assert_eq!(table.n_games(123), 0);
    }
}

//! Monte Carlo matchup simulator.
//!
//! Consumes one matchup plus a posterior store and produces full outcome
//! distributions. Every posterior draw is an independent world: compute both
//! sides' event rates from that draw's coefficients, sample event counts,
//! weight into total runs, resolve ties with the sudden-death rule. Draw i
//! seeds its own RNG as `base_seed + i`, so the reduction is deterministic
//! and order-insensitive regardless of worker scheduling.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::domain::ids::{GameId, PitcherId, TeamId};
use crate::error::{Result, RunlineError};
use crate::model::likelihood::{sample_event_count, EVENT_TYPES};
use crate::model::posterior::PosteriorStore;

/// One matchup to price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matchup {
    pub game_id: GameId,
    pub home_team: TeamId,
    pub away_team: TeamId,
    /// None = starter unknown; the draw falls back to the team pitching mean
    pub home_pitcher: Option<PitcherId>,
    pub away_pitcher: Option<PitcherId>,
    pub neutral_site: bool,
}

/// Outcome distributions for one matchup. Ephemeral: recomputed per request,
/// never persisted as ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub game_id: GameId,
    pub draws_used: usize,
    pub p_home_win: f64,
    pub p_away_win: f64,
    pub mean_home_runs: f64,
    pub mean_away_runs: f64,
    /// Count of draws by total runs (index = home + away runs)
    pub total_runs_histogram: Vec<u64>,
    /// Count of draws by home margin; index 0 corresponds to `margin_offset`
    pub margin_histogram: Vec<u64>,
    pub margin_offset: i64,
}

impl SimulationResult {
    /// P(home margin > line). For a home runline of -1.5 pass 1.5.
    pub fn cover_probability(&self, margin_line: f64) -> f64 {
        let mut covered = 0u64;
        for (i, &count) in self.margin_histogram.iter().enumerate() {
            let margin = self.margin_offset + i as i64;
            if (margin as f64) > margin_line {
                covered += count;
            }
        }
        covered as f64 / self.draws_used.max(1) as f64
    }

    /// P(total runs > line); integer lines leave pushes to the caller via
    /// the histogram
    pub fn over_probability(&self, total_line: f64) -> f64 {
        let mut over = 0u64;
        for (total, &count) in self.total_runs_histogram.iter().enumerate() {
            if (total as f64) > total_line {
                over += count;
            }
        }
        over as f64 / self.draws_used.max(1) as f64
    }
}

struct DrawOutcome {
    home_runs: u32,
    away_runs: u32,
    home_win: bool,
}

pub struct Simulator<'a> {
    store: &'a PosteriorStore,
    cfg: &'a SimConfig,
}

impl<'a> Simulator<'a> {
    pub fn new(store: &'a PosteriorStore, cfg: &'a SimConfig) -> Self {
        Self { store, cfg }
    }

    /// Simulate a matchup over every posterior draw.
    ///
    /// The draw budget is `cfg.draws` capped at the store size times a
    /// round-robin reuse of draws when the caller asks for more draws than
    /// the posterior holds.
    pub fn simulate(&self, matchup: &Matchup) -> Result<SimulationResult> {
        let layout = &self.store.layout;
        let home_t = layout.team_index(matchup.home_team).ok_or_else(|| {
            RunlineError::Validation(format!(
                "team {} not in posterior (fit {})",
                matchup.home_team, self.store.fit_date
            ))
        })?;
        let away_t = layout.team_index(matchup.away_team).ok_or_else(|| {
            RunlineError::Validation(format!(
                "team {} not in posterior (fit {})",
                matchup.away_team, self.store.fit_date
            ))
        })?;
        if self.store.draws.is_empty() {
            return Err(RunlineError::Validation("posterior store has no draws".into()));
        }

        // Unlisted starters degrade to the team mean rather than erroring
        let home_sp = matchup.home_pitcher.and_then(|p| layout.pitcher_index(p));
        let away_sp = matchup.away_pitcher.and_then(|p| layout.pitcher_index(p));

        let n = self.cfg.draws;
        let outcomes: Vec<DrawOutcome> = (0..n)
            .into_par_iter()
            .map(|i| {
                let draw = &self.store.draws[i % self.store.draws.len()];
                let mut rng = StdRng::seed_from_u64(self.cfg.seed.wrapping_add(i as u64));
                self.simulate_one(
                    &draw.params,
                    home_t,
                    away_t,
                    home_sp,
                    away_sp,
                    matchup.neutral_site,
                    i,
                    &mut rng,
                )
            })
            .collect();

        let mut home_wins = 0u64;
        let mut home_total = 0u64;
        let mut away_total = 0u64;
        let mut total_hist: Vec<u64> = Vec::new();
        let mut min_margin = i64::MAX;
        let mut max_margin = i64::MIN;
        for o in &outcomes {
            let margin = o.home_runs as i64 - o.away_runs as i64;
            min_margin = min_margin.min(margin);
            max_margin = max_margin.max(margin);
            let total = (o.home_runs + o.away_runs) as usize;
            if total >= total_hist.len() {
                total_hist.resize(total + 1, 0);
            }
            total_hist[total] += 1;
            home_total += o.home_runs as u64;
            away_total += o.away_runs as u64;
            if o.home_win {
                home_wins += 1;
            }
        }

        let mut margin_hist = vec![0u64; (max_margin - min_margin + 1) as usize];
        for o in &outcomes {
            let margin = o.home_runs as i64 - o.away_runs as i64;
            margin_hist[(margin - min_margin) as usize] += 1;
        }

        let nf = n as f64;
        Ok(SimulationResult {
            game_id: matchup.game_id,
            draws_used: n,
            p_home_win: home_wins as f64 / nf,
            p_away_win: 1.0 - home_wins as f64 / nf,
            mean_home_runs: home_total as f64 / nf,
            mean_away_runs: away_total as f64 / nf,
            total_runs_histogram: total_hist,
            margin_histogram: margin_hist,
            margin_offset: min_margin,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn simulate_one(
        &self,
        params: &[f64],
        home_t: usize,
        away_t: usize,
        home_sp: Option<usize>,
        away_sp: Option<usize>,
        neutral: bool,
        draw_index: usize,
        rng: &mut StdRng,
    ) -> DrawOutcome {
        let layout = &self.store.layout;
        let mut home_runs = 0u32;
        let mut away_runs = 0u32;
        let mut home_rate_total = 0.0;
        let mut away_rate_total = 0.0;

        for k in 0..EVENT_TYPES {
            let phi = params[layout.log_phi_idx(k)].exp();
            let runs_per_event = k as u32 + 1;

            // Home bats against the away starter
            let home_mean = layout
                .log_rate(params, k, home_t, away_t, away_sp, !neutral)
                .exp();
            home_rate_total += runs_per_event as f64 * home_mean;
            home_runs += runs_per_event
                * sample_event_count(rng, self.store.distributions[k], home_mean, phi);

            let away_mean = layout
                .log_rate(params, k, away_t, home_t, home_sp, false)
                .exp();
            away_rate_total += runs_per_event as f64 * away_mean;
            away_runs += runs_per_event
                * sample_event_count(rng, self.store.distributions[k], away_mean, phi);
        }

        let home_win = if home_runs != away_runs {
            home_runs > away_runs
        } else {
            self.break_tie(home_rate_total, away_rate_total, draw_index, rng)
        };
        DrawOutcome { home_runs, away_runs, home_win }
    }

    /// Sudden-death extra frames: each side draws one Poisson inning at a
    /// ninth of its total run rate, repeated until the frame differs. After
    /// `max_extra_frames` the side with the higher rate wins; exactly equal
    /// rates alternate by draw parity to stay unbiased.
    fn break_tie(
        &self,
        home_rate: f64,
        away_rate: f64,
        draw_index: usize,
        rng: &mut StdRng,
    ) -> bool {
        let per_inning = |rate: f64| (rate / 9.0).max(1e-6);
        let home_dist = Poisson::new(per_inning(home_rate)).ok();
        let away_dist = Poisson::new(per_inning(away_rate)).ok();

        if let (Some(h), Some(a)) = (home_dist, away_dist) {
            for _ in 0..self.cfg.max_extra_frames {
                let hr = h.sample(rng) as u32;
                let ar = a.sample(rng) as u32;
                if hr != ar {
                    return hr > ar;
                }
            }
        }
        if home_rate != away_rate {
            home_rate > away_rate
        } else {
            draw_index % 2 == 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::likelihood::default_distributions;
    use crate::model::posterior::{ConvergenceDiagnostics, ParamLayout, PosteriorDraw};
    use chrono::{NaiveDate, Utc};

    /// Single-draw store with hand-set coefficients
    fn store_with(adjust: impl Fn(&ParamLayout, &mut Vec<f64>)) -> PosteriorStore {
        let layout = ParamLayout::new(vec![1, 2], vec![]);
        let mut params = vec![0.0; layout.n_params()];
        // League-ish intercepts: lots of singles, few big innings
        let base = [1.6_f64, 0.5, 0.2, 0.1];
        for k in 0..EVENT_TYPES {
            params[layout.intercept_idx(k)] = base[k].ln();
            params[layout.log_phi_idx(k)] = 10.0_f64.ln();
        }
        adjust(&layout, &mut params);
        PosteriorStore {
            fit_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            created_at: Utc::now(),
            layout,
            distributions: default_distributions(),
            draws: vec![PosteriorDraw { params }],
            diagnostics: ConvergenceDiagnostics {
                rhat: vec![1.0],
                ess: vec![1.0],
                n_chains: 1,
                n_draws_per_chain: 1,
            },
        }
    }

    fn matchup(neutral: bool) -> Matchup {
        Matchup {
            game_id: 7,
            home_team: 1,
            away_team: 2,
            home_pitcher: None,
            away_pitcher: None,
            neutral_site: neutral,
        }
    }

    #[test]
    fn test_equal_teams_neutral_site_near_coin_flip() {
        let store = store_with(|_, _| {});
        let cfg = SimConfig { draws: 10_000, seed: 11, max_extra_frames: 24 };
        let sim = Simulator::new(&store, &cfg);
        let result = sim.simulate(&matchup(true)).unwrap();
        assert!(
            (result.p_home_win - 0.5).abs() <= 0.02,
            "p_home={}",
            result.p_home_win
        );
        assert!((result.p_home_win + result.p_away_win - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_strong_attack_outscores_suppressed_side() {
        let store = store_with(|layout, params| {
            let t1 = layout.team_index(1).unwrap();
            let t2 = layout.team_index(2).unwrap();
            for k in 0..EVENT_TYPES {
                // Home offense up, away offense suppressed by home defense
                params[layout.attack_idx(k, t1)] = 0.5;
                params[layout.defense_idx(k, t1)] = -0.5;
                let _ = t2;
            }
        });
        let cfg = SimConfig { draws: 8_000, seed: 13, max_extra_frames: 24 };
        let sim = Simulator::new(&store, &cfg);
        let result = sim.simulate(&matchup(true)).unwrap();
        assert!(
            result.mean_home_runs > result.mean_away_runs,
            "home {} vs away {}",
            result.mean_home_runs,
            result.mean_away_runs
        );
        assert!(result.p_home_win > 0.6, "p_home={}", result.p_home_win);
    }

    #[test]
    fn test_home_advantage_moves_probability() {
        let store = store_with(|layout, params| {
            for k in 0..EVENT_TYPES {
                params[layout.home_adv_idx(k)] = 0.1;
            }
        });
        let cfg = SimConfig { draws: 8_000, seed: 17, max_extra_frames: 24 };
        let sim = Simulator::new(&store, &cfg);
        let home_field = sim.simulate(&matchup(false)).unwrap();
        let neutral = sim.simulate(&matchup(true)).unwrap();
        assert!(
            home_field.p_home_win > neutral.p_home_win,
            "home-field {} should beat neutral {}",
            home_field.p_home_win,
            neutral.p_home_win
        );
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let store = store_with(|_, _| {});
        let cfg = SimConfig { draws: 2_000, seed: 23, max_extra_frames: 24 };
        let sim = Simulator::new(&store, &cfg);
        let a = sim.simulate(&matchup(false)).unwrap();
        let b = sim.simulate(&matchup(false)).unwrap();
        assert_eq!(a.p_home_win, b.p_home_win);
        assert_eq!(a.total_runs_histogram, b.total_runs_histogram);
        assert_eq!(a.margin_histogram, b.margin_histogram);
    }

    #[test]
    fn test_cover_and_over_probabilities_consistent() {
        let store = store_with(|_, _| {});
        let cfg = SimConfig { draws: 4_000, seed: 29, max_extra_frames: 24 };
        let sim = Simulator::new(&store, &cfg);
        let r = sim.simulate(&matchup(true)).unwrap();

        // Monotone in the line
        assert!(r.cover_probability(-1.5) >= r.cover_probability(1.5));
        assert!(r.over_probability(6.5) >= r.over_probability(10.5));
        // Histogram masses the same draws the probabilities do
        let total_draws: u64 = r.total_runs_histogram.iter().sum();
        assert_eq!(total_draws as usize, r.draws_used);
        let margin_draws: u64 = r.margin_histogram.iter().sum();
        assert_eq!(margin_draws as usize, r.draws_used);
    }

    #[test]
    fn test_unknown_team_is_an_error() {
        let store = store_with(|_, _| {});
        let cfg = SimConfig::default();
        let sim = Simulator::new(&store, &cfg);
        let mut m = matchup(false);
        m.home_team = 99;
        assert!(sim.simulate(&m).is_err());
    }
}

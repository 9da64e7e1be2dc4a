//! Hierarchical run-event model fit.
//!
//! Fits attack/defense/home-advantage/intercept coefficients per event
//! magnitude plus pitcher abilities linked to their team's pitching mean,
//! from `FullRunEvent` observations strictly before the as-of date.
//!
//! The sampler is multi-chain adaptive random-walk Metropolis with
//! component-wise updates and cached per-row likelihood terms. Chains are
//! independent workers (rayon) combined only for the convergence check. The
//! contract is the diagnostics gate, not the sampling algorithm: a fit whose
//! split R-hat / ESS fail the configured thresholds is rejected with
//! `ConvergenceError` and the previous snapshot stays live.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::domain::ids::{PitcherId, TeamId};
use crate::domain::observation::{FullRunEventGame, GameObservation};
use crate::domain::rating::{PitcherRating, Provenance, TeamSeasonRating};
use crate::error::{Result, RunlineError};
use crate::model::likelihood::{event_log_pmf, EVENT_TYPES};
use crate::model::posterior::{
    effective_sample_size, split_rhat, ConvergenceDiagnostics, ParamLayout, PosteriorDraw,
    PosteriorStore,
};

/// One batting side of one game, resolved to layout indices
#[derive(Debug, Clone)]
struct Row {
    counts: [u32; EVENT_TYPES],
    batting_team: usize,
    fielding_team: usize,
    /// Fielding side's starter; None = unknown, resolves to team pitch mean
    starter: Option<usize>,
    is_home: bool,
}

/// Assembled training data plus the records excluded for integrity failures
pub struct FitData {
    pub layout: ParamLayout,
    rows: Vec<Row>,
    /// Pitcher index -> team index (most recent team the pitcher started for)
    pitcher_team: Vec<usize>,
    /// Games played per team index in the training window
    games_played: Vec<u32>,
    /// Excluded records: (game id, reason)
    pub excluded: Vec<(u64, String)>,
}

impl FitData {
    /// Assemble rows from observations with `game_date < as_of`.
    ///
    /// Causality is enforced here by assertion, not trusted from upstream:
    /// any full run-event record dated `>= as_of` aborts the fit.
    /// Records failing the run-event reconciliation invariant are excluded
    /// and logged with their game id, never repaired.
    pub fn assemble(observations: &[GameObservation], as_of: NaiveDate) -> Result<FitData> {
        let mut games: Vec<&FullRunEventGame> = Vec::new();
        let mut excluded = Vec::new();

        for obs in observations {
            let game = match obs {
                GameObservation::FullRunEvent(g) => g,
                // Score-only games carry no event counts; the Elo baseline
                // consumes them instead
                GameObservation::ScoreOnly(_) => continue,
            };
            if game.game_date >= as_of {
                return Err(RunlineError::Lookahead {
                    game_id: game.game_id,
                    game_date: game.game_date,
                    as_of,
                });
            }
            match game.validate() {
                Ok(()) => games.push(game),
                Err(RunlineError::DataIntegrity { game_id, reason }) => {
                    warn!(game_id, %reason, "excluding game from fit");
                    excluded.push((game_id, reason));
                }
                Err(e) => return Err(e),
            }
        }

        if games.is_empty() {
            return Err(RunlineError::InsufficientData(format!(
                "no valid full run-event games before {}",
                as_of
            )));
        }

        let mut teams: Vec<TeamId> = Vec::new();
        let mut pitchers: Vec<PitcherId> = Vec::new();
        for g in &games {
            teams.push(g.home.team_id);
            teams.push(g.away.team_id);
            pitchers.push(g.home.starting_pitcher_id);
            pitchers.push(g.away.starting_pitcher_id);
        }
        let layout = ParamLayout::new(teams, pitchers);

        let mut rows = Vec::with_capacity(games.len() * 2);
        let mut pitcher_team = vec![usize::MAX; layout.n_pitchers()];
        let mut games_played = vec![0u32; layout.n_teams()];

        for g in &games {
            let home_t = layout.team_index(g.home.team_id).expect("home team in layout");
            let away_t = layout.team_index(g.away.team_id).expect("away team in layout");
            games_played[home_t] += 1;
            games_played[away_t] += 1;

            let home_sp = layout.pitcher_index(g.home.starting_pitcher_id);
            let away_sp = layout.pitcher_index(g.away.starting_pitcher_id);
            if let Some(p) = home_sp {
                pitcher_team[p] = home_t;
            }
            if let Some(p) = away_sp {
                pitcher_team[p] = away_t;
            }

            let counts = |side: &crate::domain::observation::SideEvents| {
                [side.events.run1, side.events.run2, side.events.run3, side.events.run4]
            };
            // Home side batting: away fields, away's starter opposes
            rows.push(Row {
                counts: counts(&g.home),
                batting_team: home_t,
                fielding_team: away_t,
                starter: away_sp,
                is_home: !g.neutral_site,
            });
            rows.push(Row {
                counts: counts(&g.away),
                batting_team: away_t,
                fielding_team: home_t,
                starter: home_sp,
                is_home: false,
            });
        }

        Ok(FitData {
            layout,
            rows,
            pitcher_team,
            games_played,
            excluded,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Prior centers and scales resolved once per fit
struct Priors {
    /// Center per parameter (seed-centered for early-season teams, else 0)
    center: Vec<f64>,
    /// Scale per parameter
    sd: Vec<f64>,
    /// Pitchers grouped by team index, for the hierarchical pitcher term
    team_pitchers: Vec<Vec<usize>>,
    pitcher_sd: f64,
}

const HOME_ADV_PRIOR_SD: f64 = 0.10;
const INTERCEPT_PRIOR_SD: f64 = 1.0;
const LOG_PHI_PRIOR_MEAN: f64 = 2.302_585_092_994_046; // ln 10
const LOG_PHI_PRIOR_SD: f64 = 1.0;

fn build_priors(data: &FitData, seeds: &[TeamSeasonRating], cfg: &ModelConfig) -> Priors {
    let layout = &data.layout;
    let seed_by_team: HashMap<TeamId, &TeamSeasonRating> =
        seeds.iter().map(|s| (s.team_id, s)).collect();

    let mut center = vec![0.0; layout.n_params()];
    let mut sd = vec![cfg.team_prior_sd; layout.n_params()];

    // Empirical mean count per row per event type anchors the intercepts
    let n = data.rows.len().max(1) as f64;
    for k in 0..EVENT_TYPES {
        let mean_k = data
            .rows
            .iter()
            .map(|r| r.counts[k] as f64)
            .sum::<f64>()
            / n;
        let idx = layout.intercept_idx(k);
        center[idx] = mean_k.max(0.05).ln();
        sd[idx] = INTERCEPT_PRIOR_SD;
        sd[layout.home_adv_idx(k)] = HOME_ADV_PRIOR_SD;
        center[layout.log_phi_idx(k)] = LOG_PHI_PRIOR_MEAN;
        sd[layout.log_phi_idx(k)] = LOG_PHI_PRIOR_SD;
    }

    for (t, &team_id) in layout.teams.iter().enumerate() {
        // Seeds center the team priors only while the in-season sample is
        // thin; afterwards the regularization pulls to zero
        let seeded = data.games_played[t] < cfg.seed_games_cutoff;
        if let (true, Some(seed)) = (seeded, seed_by_team.get(&team_id)) {
            for k in 0..EVENT_TYPES {
                center[layout.attack_idx(k, t)] = seed.attack[k];
                center[layout.defense_idx(k, t)] = seed.defense[k];
            }
        }
    }

    for p in 0..layout.n_pitchers() {
        for k in 0..EVENT_TYPES {
            sd[layout.pitcher_idx(k, p)] = cfg.pitcher_prior_sd;
        }
    }

    let mut team_pitchers = vec![Vec::new(); layout.n_teams()];
    for (p, &t) in data.pitcher_team.iter().enumerate() {
        if t != usize::MAX {
            team_pitchers[t].push(p);
        }
    }

    Priors {
        center,
        sd,
        team_pitchers,
        pitcher_sd: cfg.pitcher_prior_sd,
    }
}

fn normal_lp(x: f64, mu: f64, sd: f64) -> f64 {
    let z = (x - mu) / sd;
    -0.5 * z * z - sd.ln()
}

/// Which (row, event type) likelihood terms each parameter touches
fn build_affected(data: &FitData) -> Vec<Vec<(u32, u8)>> {
    let layout = &data.layout;
    let mut affected: Vec<Vec<(u32, u8)>> = vec![Vec::new(); layout.n_params()];
    for (i, row) in data.rows.iter().enumerate() {
        let i = i as u32;
        for k in 0..EVENT_TYPES {
            let k8 = k as u8;
            affected[layout.attack_idx(k, row.batting_team)].push((i, k8));
            affected[layout.defense_idx(k, row.fielding_team)].push((i, k8));
            match row.starter {
                Some(p) => affected[layout.pitcher_idx(k, p)].push((i, k8)),
                None => affected[layout.pitch_mean_idx(k, row.fielding_team)].push((i, k8)),
            }
            if row.is_home {
                affected[layout.home_adv_idx(k)].push((i, k8));
            }
            affected[layout.intercept_idx(k)].push((i, k8));
            affected[layout.log_phi_idx(k)].push((i, k8));
        }
    }
    affected
}

struct ChainState<'a> {
    data: &'a FitData,
    priors: &'a Priors,
    cfg: &'a ModelConfig,
    affected: &'a [Vec<(u32, u8)>],
    params: Vec<f64>,
    /// Cached log-likelihood per (row, event type)
    loglik: Vec<[f64; EVENT_TYPES]>,
    scales: Vec<f64>,
    accepts: Vec<u32>,
    proposals: Vec<u32>,
}

impl<'a> ChainState<'a> {
    fn row_term(&self, row: &Row, k: usize, params: &[f64]) -> f64 {
        let layout = &self.data.layout;
        let lp = layout.log_rate(
            params,
            k,
            row.batting_team,
            row.fielding_team,
            row.starter,
            row.is_home,
        );
        // Rates are exp(linear predictor): strictly positive by construction
        let mean = lp.exp();
        let phi = params[layout.log_phi_idx(k)].exp();
        event_log_pmf(self.cfg.distributions[k], row.counts[k], mean, phi)
    }

    fn refresh_loglik(&mut self) {
        let params = self.params.clone();
        self.loglik = self
            .data
            .rows
            .iter()
            .map(|row| {
                let mut terms = [0.0; EVENT_TYPES];
                for k in 0..EVENT_TYPES {
                    terms[k] = self.row_term(row, k, &params);
                }
                terms
            })
            .collect();
    }

    /// Log-prior contribution of parameter j, including the hierarchical
    /// pitcher terms hanging off a team pitching mean
    fn prior_term(&self, j: usize, value: f64, params: &[f64]) -> f64 {
        let layout = &self.data.layout;
        let base = normal_lp(value, self.priors.center[j], self.priors.sd[j]);

        // A team pitching mean is also the prior center for its pitchers
        for k in 0..EVENT_TYPES {
            if layout.n_teams() == 0 {
                break;
            }
            let block_start = layout.pitch_mean_idx(k, 0);
            let block_end = layout.pitch_mean_idx(k, layout.n_teams() - 1);
            if j >= block_start && j <= block_end {
                let team = j - block_start;
                let mut extra = 0.0;
                for &p in &self.priors.team_pitchers[team] {
                    extra += normal_lp(
                        params[layout.pitcher_idx(k, p)],
                        value,
                        self.priors.pitcher_sd,
                    );
                }
                return base + extra;
            }
        }

        // A pitcher's prior is centered on its team's current pitching mean
        for k in 0..EVENT_TYPES {
            if layout.n_pitchers() == 0 {
                break;
            }
            let block_start = layout.pitcher_idx(k, 0);
            let block_end = layout.pitcher_idx(k, layout.n_pitchers() - 1);
            if j >= block_start && j <= block_end {
                let p = j - block_start;
                let team = self.data.pitcher_team[p];
                let mu = if team == usize::MAX {
                    0.0
                } else {
                    params[layout.pitch_mean_idx(k, team)]
                };
                return normal_lp(value, mu, self.priors.pitcher_sd);
            }
        }

        base
    }

    fn update_param(&mut self, j: usize, rng: &mut StdRng) {
        let old = self.params[j];
        let step: f64 = rng.sample(StandardNormal);
        let proposal = old + self.scales[j] * step;

        let mut delta = self.prior_term(j, proposal, &self.params)
            - self.prior_term(j, old, &self.params);

        let mut new_terms: Vec<(u32, u8, f64)> = Vec::with_capacity(self.affected[j].len());
        self.params[j] = proposal;
        for &(row_i, k) in &self.affected[j] {
            let row = &self.data.rows[row_i as usize];
            let term = self.row_term(row, k as usize, &self.params);
            delta += term - self.loglik[row_i as usize][k as usize];
            new_terms.push((row_i, k, term));
        }

        self.proposals[j] += 1;
        if delta >= 0.0 || rng.gen::<f64>() < delta.exp() {
            self.accepts[j] += 1;
            for (row_i, k, term) in new_terms {
                self.loglik[row_i as usize][k as usize] = term;
            }
        } else {
            self.params[j] = old;
        }
    }

    /// Recenter attack and defense to sum to zero within the fit, folding
    /// the means into the intercept so every event rate is unchanged
    fn recenter(&mut self) {
        let layout = self.data.layout.clone();
        let nt = layout.n_teams() as f64;
        for k in 0..EVENT_TYPES {
            let mean_a: f64 =
                (0..layout.n_teams()).map(|t| self.params[layout.attack_idx(k, t)]).sum::<f64>() / nt;
            let mean_d: f64 =
                (0..layout.n_teams()).map(|t| self.params[layout.defense_idx(k, t)]).sum::<f64>() / nt;
            for t in 0..layout.n_teams() {
                self.params[layout.attack_idx(k, t)] -= mean_a;
                self.params[layout.defense_idx(k, t)] -= mean_d;
            }
            self.params[layout.intercept_idx(k)] += mean_a + mean_d;
        }
    }

    fn adapt(&mut self) {
        for j in 0..self.scales.len() {
            if self.proposals[j] == 0 {
                continue;
            }
            let rate = self.accepts[j] as f64 / self.proposals[j] as f64;
            // Component-wise Metropolis targets ~0.44 acceptance
            if rate > 0.44 {
                self.scales[j] *= 1.1;
            } else {
                self.scales[j] *= 0.9;
            }
            self.accepts[j] = 0;
            self.proposals[j] = 0;
        }
    }
}

fn run_chain(
    data: &FitData,
    priors: &Priors,
    cfg: &ModelConfig,
    affected: &[Vec<(u32, u8)>],
    chain_idx: usize,
) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(chain_idx as u64));
    let n_params = data.layout.n_params();

    // Start at the prior centers with chain-specific jitter
    let mut params = priors.center.clone();
    for p in params.iter_mut() {
        let jitter: f64 = rng.sample(StandardNormal);
        *p += 0.05 * jitter;
    }

    let mut chain = ChainState {
        data,
        priors,
        cfg,
        affected,
        params,
        loglik: Vec::new(),
        scales: vec![0.1; n_params],
        accepts: vec![0; n_params],
        proposals: vec![0; n_params],
    };
    chain.refresh_loglik();

    let total_iters = cfg.warmup + cfg.draws_per_chain * cfg.thin.max(1);
    let mut kept: Vec<Vec<f64>> = Vec::with_capacity(cfg.draws_per_chain);

    for iter in 0..total_iters {
        for j in 0..n_params {
            chain.update_param(j, &mut rng);
        }
        chain.recenter();

        let in_warmup = iter < cfg.warmup;
        if in_warmup && iter % 50 == 49 {
            chain.adapt();
        }
        if !in_warmup {
            let post = iter - cfg.warmup;
            if post % cfg.thin.max(1) == 0 && kept.len() < cfg.draws_per_chain {
                kept.push(chain.params.clone());
            }
        }
    }
    kept
}

/// Fit the run-event model as of `as_of`.
///
/// Seeds from the Prior Builder center the team priors while per-team
/// samples are thin. On convergence failure the error carries the worst
/// diagnostics; callers keep serving the previous posterior snapshot.
pub fn fit_run_event_model(
    observations: &[GameObservation],
    as_of: NaiveDate,
    seeds: &[TeamSeasonRating],
    cfg: &ModelConfig,
) -> Result<PosteriorStore> {
    let data = FitData::assemble(observations, as_of)?;
    info!(
        rows = data.n_rows(),
        teams = data.layout.n_teams(),
        pitchers = data.layout.n_pitchers(),
        excluded = data.excluded.len(),
        %as_of,
        "assembled run-event fit"
    );

    let priors = build_priors(&data, seeds, cfg);
    let affected = build_affected(&data);

    // Chains are independent; no shared mutable state until the final check
    let chains: Vec<Vec<Vec<f64>>> = (0..cfg.chains)
        .into_par_iter()
        .map(|c| run_chain(&data, &priors, cfg, &affected, c))
        .collect();

    let n_params = data.layout.n_params();
    let mut rhat = Vec::with_capacity(n_params);
    let mut ess = Vec::with_capacity(n_params);
    for j in 0..n_params {
        let series: Vec<Vec<f64>> = chains
            .iter()
            .map(|chain| chain.iter().map(|draw| draw[j]).collect())
            .collect();
        rhat.push(split_rhat(&series));
        ess.push(effective_sample_size(&series));
    }

    let diagnostics = ConvergenceDiagnostics {
        rhat,
        ess,
        n_chains: cfg.chains,
        n_draws_per_chain: cfg.draws_per_chain,
    };

    if !diagnostics.passes(cfg.max_rhat, cfg.min_ess) {
        return Err(RunlineError::Convergence {
            reason: format!(
                "thresholds rhat<={} ess>={} not met",
                cfg.max_rhat, cfg.min_ess
            ),
            max_rhat: diagnostics.max_rhat(),
            min_ess: diagnostics.min_ess(),
        });
    }

    debug!(
        max_rhat = diagnostics.max_rhat(),
        min_ess = diagnostics.min_ess(),
        "fit converged"
    );

    let draws = chains
        .into_iter()
        .flatten()
        .map(|params| PosteriorDraw { params })
        .collect();

    Ok(PosteriorStore {
        fit_date: as_of,
        created_at: Utc::now(),
        layout: data.layout,
        distributions: cfg.distributions,
        draws,
        diagnostics,
    })
}

/// Posterior-mean team ratings from a converged store, tagged `Fitted`
pub fn team_ratings_from_store(
    store: &PosteriorStore,
    season: crate::domain::ids::Season,
    conference_of: &HashMap<TeamId, crate::domain::ids::ConferenceId>,
) -> Vec<TeamSeasonRating> {
    let layout = &store.layout;
    let n = store.n_draws().max(1) as f64;
    layout
        .teams
        .iter()
        .enumerate()
        .map(|(t, &team_id)| {
            let mut attack = [0.0; EVENT_TYPES];
            let mut defense = [0.0; EVENT_TYPES];
            let mut home_advantage = [0.0; EVENT_TYPES];
            for draw in &store.draws {
                for k in 0..EVENT_TYPES {
                    attack[k] += draw.params[layout.attack_idx(k, t)] / n;
                    defense[k] += draw.params[layout.defense_idx(k, t)] / n;
                    home_advantage[k] += draw.params[layout.home_adv_idx(k)] / n;
                }
            }
            TeamSeasonRating {
                team_id,
                season,
                conference_id: conference_of.get(&team_id).copied().unwrap_or(0),
                attack,
                defense,
                home_advantage,
                provenance: Provenance::Fitted,
                fit_timestamp: store.created_at,
            }
        })
        .collect()
}

/// Posterior-mean pitcher ratings; the shrinkage weight reports how far the
/// posterior stayed from the individual data toward the team mean
pub fn pitcher_ratings_from_store(store: &PosteriorStore, data: &FitData) -> Vec<PitcherRating> {
    let layout = &store.layout;
    let n = store.n_draws().max(1) as f64;
    layout
        .pitchers
        .iter()
        .enumerate()
        .map(|(p, &pitcher_id)| {
            let team_idx = data.pitcher_team[p];
            let team_id = if team_idx == usize::MAX {
                0
            } else {
                layout.teams[team_idx]
            };
            let mut ability = [0.0; EVENT_TYPES];
            let mut sd_sum = 0.0;
            for k in 0..EVENT_TYPES {
                let series: Vec<f64> = store
                    .draws
                    .iter()
                    .map(|d| d.params[layout.pitcher_idx(k, p)])
                    .collect();
                let mean = series.iter().sum::<f64>() / n;
                let var = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                ability[k] = mean;
                sd_sum += var.sqrt();
            }
            // Posterior sd near the prior sd means the data barely moved the
            // pitcher off the team mean
            let shrinkage_weight = (sd_sum / EVENT_TYPES as f64 / 0.10).clamp(0.0, 1.0);
            PitcherRating {
                pitcher_id,
                team_id,
                season: 0,
                ability,
                shrinkage_weight,
                fit_timestamp: store.created_at,
            }
        })
        .collect()
}

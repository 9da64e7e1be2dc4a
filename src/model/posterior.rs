//! Posterior draws, parameter layout, and convergence diagnostics.
//!
//! A `PosteriorStore` is the immutable output of one completed fit: an
//! ordered, fixed-size collection of jointly-sampled parameter vectors plus
//! the diagnostics that justified publishing it. Stores are versioned by fit
//! date and superseded, never mutated.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{PitcherId, TeamId, UNKNOWN_PITCHER};
use crate::model::likelihood::{EventDistribution, EVENT_TYPES};

/// Maps (event type, team/pitcher) coordinates into the flat parameter
/// vector shared by every draw.
///
/// Per event type k the block is:
/// `attack[T] | defense[T] | team_pitch_mean[T] | pitcher[P] | home_adv | intercept | log_phi`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamLayout {
    /// Sorted canonical team ids present in the training window
    pub teams: Vec<TeamId>,
    /// Sorted canonical pitcher ids (unknown starter id 0 excluded)
    pub pitchers: Vec<PitcherId>,
}

impl ParamLayout {
    pub fn new(mut teams: Vec<TeamId>, mut pitchers: Vec<PitcherId>) -> Self {
        teams.sort_unstable();
        teams.dedup();
        pitchers.sort_unstable();
        pitchers.dedup();
        pitchers.retain(|&p| p != UNKNOWN_PITCHER);
        Self { teams, pitchers }
    }

    pub fn n_teams(&self) -> usize {
        self.teams.len()
    }

    pub fn n_pitchers(&self) -> usize {
        self.pitchers.len()
    }

    /// Parameters per event-type block
    fn block(&self) -> usize {
        3 * self.n_teams() + self.n_pitchers() + 3
    }

    pub fn n_params(&self) -> usize {
        EVENT_TYPES * self.block()
    }

    pub fn team_index(&self, team: TeamId) -> Option<usize> {
        self.teams.binary_search(&team).ok()
    }

    pub fn pitcher_index(&self, pitcher: PitcherId) -> Option<usize> {
        self.pitchers.binary_search(&pitcher).ok()
    }

    pub fn attack_idx(&self, k: usize, team: usize) -> usize {
        k * self.block() + team
    }

    pub fn defense_idx(&self, k: usize, team: usize) -> usize {
        k * self.block() + self.n_teams() + team
    }

    pub fn pitch_mean_idx(&self, k: usize, team: usize) -> usize {
        k * self.block() + 2 * self.n_teams() + team
    }

    pub fn pitcher_idx(&self, k: usize, pitcher: usize) -> usize {
        k * self.block() + 3 * self.n_teams() + pitcher
    }

    pub fn home_adv_idx(&self, k: usize) -> usize {
        k * self.block() + 3 * self.n_teams() + self.n_pitchers()
    }

    pub fn intercept_idx(&self, k: usize) -> usize {
        self.home_adv_idx(k) + 1
    }

    pub fn log_phi_idx(&self, k: usize) -> usize {
        self.home_adv_idx(k) + 2
    }

    /// Linear predictor for one side's event type k:
    /// attack[bat] + defense[field] + pitcher[opposing starter] +
    /// home_adv * is_home + intercept.
    ///
    /// `starter` is the fielding side's starter index; None resolves to the
    /// fielding team's pitching mean (the freshman/unknown-starter case).
    pub fn log_rate(
        &self,
        params: &[f64],
        k: usize,
        batting_team: usize,
        fielding_team: usize,
        starter: Option<usize>,
        is_home: bool,
    ) -> f64 {
        let pitcher_term = match starter {
            Some(p) => params[self.pitcher_idx(k, p)],
            None => params[self.pitch_mean_idx(k, fielding_team)],
        };
        params[self.attack_idx(k, batting_team)]
            + params[self.defense_idx(k, fielding_team)]
            + pitcher_term
            + if is_home { params[self.home_adv_idx(k)] } else { 0.0 }
            + params[self.intercept_idx(k)]
    }
}

/// One complete jointly-sampled parameter vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorDraw {
    pub params: Vec<f64>,
}

/// Per-parameter convergence diagnostics from the combined chains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceDiagnostics {
    /// Split scale-reduction statistic per parameter
    pub rhat: Vec<f64>,
    /// Effective sample size per parameter
    pub ess: Vec<f64>,
    pub n_chains: usize,
    pub n_draws_per_chain: usize,
}

impl ConvergenceDiagnostics {
    pub fn max_rhat(&self) -> f64 {
        self.rhat.iter().cloned().fold(f64::NAN, f64::max)
    }

    pub fn min_ess(&self) -> f64 {
        self.ess.iter().cloned().fold(f64::NAN, f64::min)
    }

    pub fn passes(&self, max_rhat: f64, min_ess: f64) -> bool {
        let worst_rhat = self.max_rhat();
        let worst_ess = self.min_ess();
        worst_rhat.is_finite() && worst_ess.is_finite() && worst_rhat <= max_rhat && worst_ess >= min_ess
    }
}

/// Immutable collection of posterior draws from one completed fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorStore {
    /// As-of date of the fit: training data is strictly before this date
    pub fit_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub layout: ParamLayout,
    pub distributions: [EventDistribution; EVENT_TYPES],
    pub draws: Vec<PosteriorDraw>,
    pub diagnostics: ConvergenceDiagnostics,
}

impl PosteriorStore {
    pub fn n_draws(&self) -> usize {
        self.draws.len()
    }

    pub fn knows_team(&self, team: TeamId) -> bool {
        self.layout.team_index(team).is_some()
    }
}

/// Split scale-reduction statistic over per-chain sequences of one scalar
/// parameter. Each chain is split in half, following the usual split-R-hat
/// construction.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let mid = chain.len() / 2;
        if mid == 0 {
            return f64::NAN;
        }
        halves.push(&chain[..mid]);
        halves.push(&chain[mid..mid * 2]);
    }
    let m = halves.len() as f64;
    let n = halves[0].len() as f64;
    if n < 2.0 {
        return f64::NAN;
    }

    let means: Vec<f64> = halves
        .iter()
        .map(|h| h.iter().sum::<f64>() / h.len() as f64)
        .collect();
    let grand = means.iter().sum::<f64>() / m;
    let b = n / (m - 1.0) * means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>();
    let w = halves
        .iter()
        .zip(&means)
        .map(|(h, mu)| h.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (n - 1.0))
        .sum::<f64>()
        / m;
    if w <= 0.0 {
        // Degenerate (constant) sequences count as converged
        return 1.0;
    }
    let var_plus = (n - 1.0) / n * w + b / n;
    (var_plus / w).sqrt()
}

/// Effective sample size across chains using the initial-positive-sequence
/// autocorrelation estimator on the pooled, chain-centered draws.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    let total: usize = chains.iter().map(|c| c.len()).sum();
    if total < 4 {
        return f64::NAN;
    }

    // Center each chain on its own mean before pooling
    let mut pooled = Vec::with_capacity(total);
    for chain in chains {
        let mu = chain.iter().sum::<f64>() / chain.len() as f64;
        pooled.extend(chain.iter().map(|x| x - mu));
    }
    let n = pooled.len();
    let var = pooled.iter().map(|x| x * x).sum::<f64>() / n as f64;
    if var <= 0.0 {
        // Constant parameter: report the nominal size
        return total as f64;
    }

    let mut rho_sum = 0.0;
    let mut t = 1;
    while t + 1 < n {
        let rho_t = autocorr(&pooled, t, var);
        let rho_t1 = autocorr(&pooled, t + 1, var);
        if rho_t + rho_t1 < 0.0 {
            break;
        }
        rho_sum += rho_t + rho_t1;
        t += 2;
    }
    (total as f64 / (1.0 + 2.0 * rho_sum)).min(total as f64)
}

fn autocorr(x: &[f64], lag: usize, var: f64) -> f64 {
    let n = x.len();
    let mut s = 0.0;
    for i in 0..n - lag {
        s += x[i] * x[i + lag];
    }
    s / ((n - lag) as f64 * var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_layout_indices_disjoint() {
        let layout = ParamLayout::new(vec![3, 1, 2], vec![10, 0, 11]);
        assert_eq!(layout.n_teams(), 3);
        assert_eq!(layout.n_pitchers(), 2); // id 0 excluded
        let mut seen = std::collections::HashSet::new();
        for k in 0..EVENT_TYPES {
            for t in 0..layout.n_teams() {
                assert!(seen.insert(layout.attack_idx(k, t)));
                assert!(seen.insert(layout.defense_idx(k, t)));
                assert!(seen.insert(layout.pitch_mean_idx(k, t)));
            }
            for p in 0..layout.n_pitchers() {
                assert!(seen.insert(layout.pitcher_idx(k, p)));
            }
            assert!(seen.insert(layout.home_adv_idx(k)));
            assert!(seen.insert(layout.intercept_idx(k)));
            assert!(seen.insert(layout.log_phi_idx(k)));
        }
        assert_eq!(seen.len(), layout.n_params());
        assert_eq!(*seen.iter().max().unwrap(), layout.n_params() - 1);
    }

    #[test]
    fn test_log_rate_unknown_starter_uses_team_mean() {
        let layout = ParamLayout::new(vec![1, 2], vec![10]);
        let mut params = vec![0.0; layout.n_params()];
        params[layout.pitch_mean_idx(0, 1)] = -0.4;
        params[layout.pitcher_idx(0, 0)] = 0.9;
        params[layout.intercept_idx(0)] = 1.0;

        let with_mean = layout.log_rate(&params, 0, 0, 1, None, false);
        assert!((with_mean - 0.6).abs() < 1e-12);
        let with_starter = layout.log_rate(&params, 0, 0, 1, Some(0), false);
        assert!((with_starter - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_split_rhat_near_one_for_iid_chains() {
        let mut rng = StdRng::seed_from_u64(3);
        let chains: Vec<Vec<f64>> = (0..4)
            .map(|_| (0..500).map(|_| rng.gen::<f64>()).collect())
            .collect();
        let r = split_rhat(&chains);
        assert!((r - 1.0).abs() < 0.05, "rhat={}", r);
    }

    #[test]
    fn test_split_rhat_large_for_disagreeing_chains() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut chains: Vec<Vec<f64>> = (0..4)
            .map(|_| (0..200).map(|_| rng.gen::<f64>()).collect())
            .collect();
        for x in chains[0].iter_mut() {
            *x += 10.0;
        }
        assert!(split_rhat(&chains) > 1.5);
    }

    #[test]
    fn test_ess_close_to_n_for_iid_draws() {
        let mut rng = StdRng::seed_from_u64(5);
        let chains: Vec<Vec<f64>> = (0..4)
            .map(|_| (0..500).map(|_| rng.gen::<f64>()).collect())
            .collect();
        let ess = effective_sample_size(&chains);
        assert!(ess > 1000.0, "ess={}", ess);
    }

    #[test]
    fn test_ess_small_for_sticky_chain() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut x = 0.0;
        let chain: Vec<f64> = (0..2000)
            .map(|_| {
                // Strongly autocorrelated AR(1)
                x = 0.995 * x + 0.1 * rng.gen::<f64>();
                x
            })
            .collect();
        let ess = effective_sample_size(&[chain]);
        assert!(ess < 200.0, "ess={}", ess);
    }

    #[test]
    fn test_diagnostics_pass_thresholds() {
        let diag = ConvergenceDiagnostics {
            rhat: vec![1.01, 1.03],
            ess: vec![450.0, 300.0],
            n_chains: 4,
            n_draws_per_chain: 250,
        };
        assert!(diag.passes(1.05, 100.0));
        assert!(!diag.passes(1.02, 100.0));
        assert!(!diag.passes(1.05, 400.0));
    }
}

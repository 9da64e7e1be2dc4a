use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::model::likelihood::{default_distributions, EventDistribution, EVENT_TYPES};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub devig: DevigConfig,
    #[serde(default)]
    pub blend: BlendConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Likelihood family per event magnitude (1, 2, 3, >=4 runs)
    #[serde(default = "default_distributions")]
    pub distributions: [EventDistribution; EVENT_TYPES],
    /// Independent sampling chains
    #[serde(default = "default_chains")]
    pub chains: usize,
    /// Warmup iterations discarded per chain
    #[serde(default = "default_warmup")]
    pub warmup: usize,
    /// Kept draws per chain (after thinning)
    #[serde(default = "default_draws_per_chain")]
    pub draws_per_chain: usize,
    /// Keep one draw every `thin` post-warmup iterations
    #[serde(default = "default_thin")]
    pub thin: usize,
    /// Reject the fit when any parameter's split R-hat exceeds this
    #[serde(default = "default_max_rhat")]
    pub max_rhat: f64,
    /// Reject the fit when any parameter's effective sample size is below this
    #[serde(default = "default_min_ess")]
    pub min_ess: f64,
    /// Prior sd on attack/defense coefficients. Tightened relative to a
    /// professional-league baseline: college per-team samples are small.
    #[serde(default = "default_team_prior_sd")]
    pub team_prior_sd: f64,
    /// Prior sd on pitcher deviations from the team pitching mean
    #[serde(default = "default_pitcher_prior_sd")]
    pub pitcher_prior_sd: f64,
    /// In-season games after which seeds stop centering the team priors
    #[serde(default = "default_seed_games_cutoff")]
    pub seed_games_cutoff: u32,
    /// Base RNG seed for the sampler chains
    #[serde(default = "default_fit_seed")]
    pub seed: u64,
}

fn default_chains() -> usize {
    4
}
fn default_warmup() -> usize {
    500
}
fn default_draws_per_chain() -> usize {
    250
}
fn default_thin() -> usize {
    2
}
fn default_max_rhat() -> f64 {
    1.05
}
fn default_min_ess() -> f64 {
    100.0
}
fn default_team_prior_sd() -> f64 {
    0.15
}
fn default_pitcher_prior_sd() -> f64 {
    0.10
}
fn default_seed_games_cutoff() -> u32 {
    12
}
fn default_fit_seed() -> u64 {
    20_260_213
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            distributions: default_distributions(),
            chains: default_chains(),
            warmup: default_warmup(),
            draws_per_chain: default_draws_per_chain(),
            thin: default_thin(),
            max_rhat: default_max_rhat(),
            min_ess: default_min_ess(),
            team_prior_sd: default_team_prior_sd(),
            pitcher_prior_sd: default_pitcher_prior_sd(),
            seed_games_cutoff: default_seed_games_cutoff(),
            seed: default_fit_seed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Monte Carlo draws per matchup
    #[serde(default = "default_sim_draws")]
    pub draws: usize,
    /// Base RNG seed; draw i uses seed + i so results are order-insensitive
    #[serde(default = "default_sim_seed")]
    pub seed: u64,
    /// Sudden-death extra frames before the higher-rate side is declared
    #[serde(default = "default_max_extra_frames")]
    pub max_extra_frames: u32,
}

fn default_sim_draws() -> usize {
    10_000
}
fn default_sim_seed() -> u64 {
    99_173
}
fn default_max_extra_frames() -> u32 {
    24
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            draws: default_sim_draws(),
            seed: default_sim_seed(),
            max_extra_frames: default_max_extra_frames(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevigConfig {
    /// Favorite/longshot implied-probability ratio above which the Power
    /// method's symmetry assumption is considered violated and Shin is used
    #[serde(default = "default_skew_ratio")]
    pub max_skew_ratio: f64,
    /// Devigged probabilities must sum to 1 within this tolerance
    #[serde(default = "default_sum_tolerance")]
    pub sum_tolerance: f64,
}

fn default_skew_ratio() -> f64 {
    4.0
}
fn default_sum_tolerance() -> f64 {
    1e-6
}

impl Default for DevigConfig {
    fn default() -> Self {
        Self {
            max_skew_ratio: default_skew_ratio(),
            sum_tolerance: default_sum_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlendConfig {
    /// Maximum weight on the market term (reached at zero games played)
    #[serde(default = "default_alpha_max")]
    pub alpha_max: f64,
    /// Games played at which the model runs unblended
    #[serde(default = "default_games_full_model")]
    pub games_full_model: u32,
}

fn default_alpha_max() -> f64 {
    0.6
}
fn default_games_full_model() -> u32 {
    25
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            alpha_max: default_alpha_max(),
            games_full_model: default_games_full_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Minimum model-minus-market edge before a recommendation is emitted
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f64,
    /// Fraction of full Kelly to stake
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    /// Hard cap on stake as a fraction of bankroll
    #[serde(default = "default_max_stake_fraction")]
    pub max_stake_fraction: f64,
}

fn default_edge_threshold() -> f64 {
    0.03
}
fn default_kelly_fraction() -> f64 {
    0.25
}
fn default_max_stake_fraction() -> f64 {
    0.05
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            edge_threshold: default_edge_threshold(),
            kelly_fraction: default_kelly_fraction(),
            max_stake_fraction: default_max_stake_fraction(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    /// Reliability-curve bin count
    #[serde(default = "default_reliability_bins")]
    pub reliability_bins: usize,
    /// Edge thresholds for the flat-stake ROI sweep
    #[serde(default = "default_roi_thresholds")]
    pub roi_thresholds: Vec<f64>,
    /// Directory for posterior snapshots and backfill checkpoints
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_reliability_bins() -> usize {
    10
}
fn default_roi_thresholds() -> Vec<f64> {
    vec![0.02, 0.04, 0.06]
}
fn default_state_dir() -> String {
    "data/state".to_string()
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reliability_bins: default_reliability_bins(),
            roi_thresholds: default_roi_thresholds(),
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            sim: SimConfig::default(),
            devig: DevigConfig::default(),
            blend: BlendConfig::default(),
            detector: DetectorConfig::default(),
            validator: ValidatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("RUNLINE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (RUNLINE_SIM__DRAWS, etc.)
            .add_source(
                Environment::with_prefix("RUNLINE")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg: Self = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.model.chains < 2 {
            errors.push("model.chains must be at least 2 for split R-hat".to_string());
        }
        if self.model.draws_per_chain == 0 {
            errors.push("model.draws_per_chain must be positive".to_string());
        }
        if self.model.max_rhat <= 1.0 {
            errors.push("model.max_rhat must exceed 1.0".to_string());
        }
        if self.model.team_prior_sd <= 0.0 || self.model.pitcher_prior_sd <= 0.0 {
            errors.push("model prior sds must be positive".to_string());
        }

        if self.sim.draws == 0 {
            errors.push("sim.draws must be positive".to_string());
        }

        if self.devig.max_skew_ratio <= 1.0 {
            errors.push("devig.max_skew_ratio must exceed 1.0".to_string());
        }
        if self.devig.sum_tolerance <= 0.0 {
            errors.push("devig.sum_tolerance must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.blend.alpha_max) {
            errors.push("blend.alpha_max must be in [0, 1]".to_string());
        }
        if self.blend.games_full_model == 0 {
            errors.push("blend.games_full_model must be positive".to_string());
        }

        if self.detector.edge_threshold < 0.0 {
            errors.push("detector.edge_threshold must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.detector.kelly_fraction) {
            errors.push("detector.kelly_fraction must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.detector.max_stake_fraction) {
            errors.push("detector.max_stake_fraction must be in [0, 1]".to_string());
        }

        if self.validator.reliability_bins < 2 {
            errors.push("validator.reliability_bins must be at least 2".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

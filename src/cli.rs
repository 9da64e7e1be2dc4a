//! Command-line interface: fit, project, backtest, detect.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::backtest::{Ledger, MarketData, WalkForwardValidator};
use crate::config::AppConfig;
use crate::domain::ids::{GameId, PitcherId, TeamId};
use crate::domain::market::{MarketQuote, OutcomeSide};
use crate::domain::observation::GameObservation;
use crate::domain::rating::TeamSeasonRating;
use crate::error::{Result, RunlineError};
use crate::market::blend::blend_with_market;
use crate::market::devig::devig_market;
use crate::market::quota::QuotaBudget;
use crate::model::elo::{fit_elo, win_prob_from_elo, DEFAULT_HOME_ADVANTAGE, DEFAULT_INITIAL, DEFAULT_K};
use crate::model::fit::fit_run_event_model;
use crate::persistence::snapshot::SnapshotStore;
use crate::sim::monte_carlo::{Matchup, Simulator};
use crate::strategy::detector::ValueDetector;

#[derive(Debug, Parser)]
#[command(name = "runline", version, about = "Baseball run-event model and market calibration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (default.toml, <env>.toml)
    #[arg(long, default_value = "config", global = true)]
    pub config_dir: String,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fit the run-event model as of a date and snapshot the posterior
    Fit {
        /// Observations JSON file (array of game observations)
        #[arg(long)]
        observations: PathBuf,
        /// As-of date; training uses games strictly before it
        #[arg(long)]
        as_of: NaiveDate,
        /// Optional Prior Builder seed ratings JSON
        #[arg(long)]
        seeds: Option<PathBuf>,
    },
    /// Project one matchup from the latest posterior (Elo fallback)
    Project {
        #[arg(long)]
        observations: PathBuf,
        #[arg(long)]
        home_team: TeamId,
        #[arg(long)]
        away_team: TeamId,
        #[arg(long)]
        home_pitcher: Option<PitcherId>,
        #[arg(long)]
        away_pitcher: Option<PitcherId>,
        /// Neutral site: no home advantage
        #[arg(long)]
        neutral: bool,
        /// Devigged market fair home probability for the maturity blend
        #[arg(long)]
        market_fair_home: Option<f64>,
        /// Games played this season, weights the market blend
        #[arg(long)]
        n_games: Option<u32>,
    },
    /// Walk-forward backtest over a date range
    Backtest {
        #[arg(long)]
        observations: PathBuf,
        /// Market quotes JSON file (array of quotes)
        #[arg(long)]
        quotes: Option<PathBuf>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Ledger path (default <state_dir>/backtest.jsonl)
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Simulated quote-feed budget; exhaustion pauses resumably
        #[arg(long)]
        quota: Option<u32>,
    },
    /// Evaluate one matchup against current quotes and flag value
    Detect {
        #[arg(long)]
        quotes: PathBuf,
        #[arg(long)]
        game_id: GameId,
        #[arg(long)]
        home_team: TeamId,
        #[arg(long)]
        away_team: TeamId,
        #[arg(long)]
        home_pitcher: Option<PitcherId>,
        #[arg(long)]
        away_pitcher: Option<PitcherId>,
        #[arg(long)]
        neutral: bool,
        #[arg(long, default_value_t = 0)]
        n_games: u32,
    },
}

pub fn load_observations(path: &Path) -> Result<Vec<GameObservation>> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

pub fn load_quotes(path: &Path) -> Result<Vec<MarketQuote>> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn load_seeds(path: Option<&PathBuf>) -> Result<Vec<TeamSeasonRating>> {
    match path {
        Some(p) => {
            let json = fs::read_to_string(p)?;
            Ok(serde_json::from_str(&json)?)
        }
        None => Ok(Vec::new()),
    }
}

pub fn run_fit(
    cfg: &AppConfig,
    observations: &Path,
    as_of: NaiveDate,
    seeds: Option<&PathBuf>,
) -> Result<()> {
    let obs = load_observations(observations)?;
    let seeds = load_seeds(seeds)?;
    let store = fit_run_event_model(&obs, as_of, &seeds, &cfg.model)?;
    let snapshots = SnapshotStore::new(&cfg.validator.state_dir)?;
    let path = snapshots.save_posterior(&store)?;
    println!(
        "Fit {}: {} draws, {} teams, {} pitchers",
        as_of,
        store.n_draws(),
        store.layout.n_teams(),
        store.layout.n_pitchers()
    );
    println!(
        "  diagnostics: max rhat {:.4}, min ess {:.1}",
        store.diagnostics.max_rhat(),
        store.diagnostics.min_ess()
    );
    println!("  snapshot: {}", path.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_project(
    cfg: &AppConfig,
    observations: &Path,
    home_team: TeamId,
    away_team: TeamId,
    home_pitcher: Option<PitcherId>,
    away_pitcher: Option<PitcherId>,
    neutral: bool,
    market_fair_home: Option<f64>,
    n_games: Option<u32>,
) -> Result<()> {
    let obs = load_observations(observations)?;
    let matchup = Matchup {
        game_id: 0,
        home_team,
        away_team,
        home_pitcher,
        away_pitcher,
        neutral_site: neutral,
    };

    let snapshots = SnapshotStore::new(&cfg.validator.state_dir)?;
    let posterior = snapshots.latest_posterior()?;
    let from_posterior = posterior.as_ref().and_then(|store| {
        let simulator = Simulator::new(store, &cfg.sim);
        simulator.simulate(&matchup).ok()
    });

    let (mut p_home, source) = match &from_posterior {
        Some(sim) => (sim.p_home_win, format!("posterior {}", posterior.as_ref().unwrap().fit_date)),
        None => {
            // Teams outside the fit window fall back to the Elo baseline
            let table = fit_elo(&obs, DEFAULT_K, DEFAULT_INITIAL, DEFAULT_HOME_ADVANTAGE);
            let adv = if neutral { 0.0 } else { DEFAULT_HOME_ADVANTAGE };
            let (p, _) = win_prob_from_elo(table.rating(home_team), table.rating(away_team), adv);
            (p, "elo baseline".to_string())
        }
    };

    if market_fair_home.is_some() {
        let n = n_games.unwrap_or(0);
        let (blended, _) = blend_with_market(p_home, market_fair_home, n, &cfg.blend);
        info!(model = p_home, blended, n_games = n, "blended with market");
        p_home = blended;
    }

    println!("  {} vs {}  ({})", home_team, away_team, source);
    if neutral {
        println!("  Neutral site (home advantage = 0)");
    }
    println!("  Win prob  home: {:.1}%  |  away: {:.1}%", p_home * 100.0, (1.0 - p_home) * 100.0);
    if let Some(sim) = from_posterior {
        println!(
            "  Mean runs home {:.2} / away {:.2}; P(over 10.5) = {:.1}%",
            sim.mean_home_runs,
            sim.mean_away_runs,
            sim.over_probability(10.5) * 100.0
        );
    }
    Ok(())
}

pub fn run_backtest(
    cfg: &AppConfig,
    observations: &Path,
    quotes: Option<&PathBuf>,
    start: NaiveDate,
    end: NaiveDate,
    ledger_path: Option<&PathBuf>,
    quota: Option<u32>,
) -> Result<()> {
    if end < start {
        return Err(RunlineError::Validation("end date before start date".to_string()));
    }
    let obs = load_observations(observations)?;

    let mut market = MarketData::default();
    if let Some(path) = quotes {
        let all = load_quotes(path)?;
        let mut by_game: HashMap<GameId, Vec<MarketQuote>> = HashMap::new();
        for q in all {
            by_game.entry(q.game_id).or_default().push(q);
        }
        market.quotes = by_game;
    }

    let dates: Vec<NaiveDate> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .collect();

    let ledger = match ledger_path {
        Some(p) => Ledger::new(p),
        None => Ledger::new(PathBuf::from(&cfg.validator.state_dir).join("backtest.jsonl")),
    };
    let snapshots = SnapshotStore::new(&cfg.validator.state_dir)?;

    let mut budget = quota.map(QuotaBudget::new);
    let validator = WalkForwardValidator::new(cfg, &[]);
    let report = match validator.run(
        &obs,
        &dates,
        &market,
        &ledger,
        &snapshots,
        budget.as_mut(),
    ) {
        Ok(report) => report,
        Err(RunlineError::QuotaExhausted { used, requested }) => {
            warn!(used, requested, "backtest paused on quota; rerun to resume");
            return Err(RunlineError::QuotaExhausted { used, requested });
        }
        Err(e) => return Err(e),
    };

    println!("Backtest {} .. {}: {} records", start, end, report.n_records);
    println!("  Brier {:.4}  log loss {:.4}", report.brier_score, report.log_loss);
    for point in &report.roi {
        println!(
            "  edge > {:.2}: {} bets, {} wins, ROI {:+.1}%",
            point.threshold,
            point.bets,
            point.wins,
            point.roi * 100.0
        );
    }
    for bin in &report.reliability {
        if bin.count > 0 {
            println!(
                "  [{:.1}-{:.1}) predicted {:.3} observed {:.3} (n={})",
                bin.lower, bin.upper, bin.mean_predicted, bin.observed_frequency, bin.count
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_detect(
    cfg: &AppConfig,
    quotes_path: &Path,
    game_id: GameId,
    home_team: TeamId,
    away_team: TeamId,
    home_pitcher: Option<PitcherId>,
    away_pitcher: Option<PitcherId>,
    neutral: bool,
    n_games: u32,
) -> Result<()> {
    let all = load_quotes(quotes_path)?;
    let quotes: Vec<MarketQuote> = all.into_iter().filter(|q| q.game_id == game_id).collect();
    if quotes.is_empty() {
        return Err(RunlineError::QuoteUnavailable { game_id });
    }

    let snapshots = SnapshotStore::new(&cfg.validator.state_dir)?;
    let store = snapshots.latest_posterior()?.ok_or_else(|| {
        RunlineError::Snapshot("no posterior snapshot; run `runline fit` first".to_string())
    })?;

    let matchup = Matchup {
        game_id,
        home_team,
        away_team,
        home_pitcher,
        away_pitcher,
        neutral_site: neutral,
    };
    let detector = ValueDetector::new(&cfg.detector, &cfg.blend, &cfg.devig, &cfg.sim);
    let recommendations = detector.detect(&matchup, &quotes, &store, n_games)?;

    if recommendations.is_empty() {
        let devig = devig_market(&quotes, &cfg.devig)?;
        let fair = devig.fair_for(OutcomeSide::Home).unwrap_or(f64::NAN);
        println!("No edge above {:.1}% (market fair home {:.3})", cfg.detector.edge_threshold * 100.0, fair);
        return Ok(());
    }
    for rec in &recommendations {
        println!(
            "{}  game {}  {}  edge {:+.3}  model {:.3} market {:.3}  stake {:.2}% of bankroll at {}",
            rec.id,
            rec.game_id,
            rec.side,
            rec.edge,
            rec.blended_prob,
            rec.market_fair_prob,
            rec.stake_fraction * 100.0,
            rec.price
        );
    }
    Ok(())
}

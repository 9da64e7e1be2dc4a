//! Walk-forward validator.
//!
//! A strictly sequential state machine over validation dates. For each date
//! D: freeze the training set to `game_date < D` (asserted here and again
//! inside the fit — lookahead is fatal, never filtered away silently),
//! fit or reuse the fit-week posterior, simulate every game on D in
//! parallel, devig the closing quotes, and append one ledger row per game.
//! Quota exhaustion checkpoints completed dates so a backfill resumes
//! without recomputation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::backtest::calibration::{calibration_report, CalibrationReport};
use crate::backtest::ledger::{BacktestRecord, Ledger};
use crate::domain::ids::{GameId, UNKNOWN_PITCHER};
use crate::domain::market::{DevigResult, MarketKind, MarketQuote, OutcomeSide};
use crate::domain::observation::GameObservation;
use crate::domain::rating::TeamSeasonRating;
use crate::error::{Result, RunlineError};
use crate::market::devig::devig_market;
use crate::market::quota::QuotaBudget;
use crate::model::fit::fit_run_event_model;
use crate::model::posterior::PosteriorStore;
use crate::persistence::snapshot::{BackfillCheckpoint, SnapshotStore};
use crate::sim::monte_carlo::{Matchup, Simulator};

/// Ordered quote history and start times, keyed by game
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub quotes: HashMap<GameId, Vec<MarketQuote>>,
    pub commence: HashMap<GameId, DateTime<Utc>>,
}

/// Cache key: refit at most once per ISO week
fn fit_week(date: NaiveDate) -> (i32, u32) {
    let week = date.iso_week();
    (week.year(), week.week())
}

pub struct WalkForwardValidator<'a> {
    cfg: &'a AppConfig,
    seeds: &'a [TeamSeasonRating],
}

impl<'a> WalkForwardValidator<'a> {
    pub fn new(cfg: &'a AppConfig, seeds: &'a [TeamSeasonRating]) -> Self {
        Self { cfg, seeds }
    }

    /// Run the full validation sweep.
    ///
    /// `dates` must be ascending. Completed dates from a previous
    /// (quota-paused) run are skipped via the checkpoint; the returned
    /// report always covers the whole ledger.
    pub fn run(
        &self,
        observations: &[GameObservation],
        dates: &[NaiveDate],
        market: &MarketData,
        ledger: &Ledger,
        snapshots: &SnapshotStore,
        mut quota: Option<&mut QuotaBudget>,
    ) -> Result<CalibrationReport> {
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RunlineError::Validation(
                "validation dates must be strictly ascending".to_string(),
            ));
        }

        let mut checkpoint = BackfillCheckpoint::default();
        snapshots.restore_checkpoint(&mut checkpoint)?;

        let cache: DashMap<(i32, u32), Arc<PosteriorStore>> = DashMap::new();
        let mut last_good: Option<Arc<PosteriorStore>> = None;

        for &date in dates {
            if checkpoint.is_done(date) {
                info!(%date, "date already ledgered, skipping");
                continue;
            }

            let training: Vec<GameObservation> = observations
                .iter()
                .filter(|o| o.game_date() < date)
                .cloned()
                .collect();
            // Belt and braces: the filter above is not trusted either
            for obs in &training {
                if obs.game_date() >= date {
                    return Err(RunlineError::Lookahead {
                        game_id: obs.game_id(),
                        game_date: obs.game_date(),
                        as_of: date,
                    });
                }
            }

            let todays: Vec<&GameObservation> = observations
                .iter()
                .filter(|o| o.game_date() == date)
                .collect();
            if todays.is_empty() {
                checkpoint.mark_done(date);
                snapshots.save_checkpoint(&checkpoint)?;
                continue;
            }

            // One quote-feed request per game; exhaustion pauses with
            // progress already persisted
            if let Some(budget) = quota.as_mut() {
                if let Err(e) = budget.consume(todays.len() as u32) {
                    warn!(%date, "quota exhausted, pausing backfill");
                    snapshots.save_checkpoint(&checkpoint)?;
                    return Err(e);
                }
            }

            let store = match self.posterior_for(date, &training, &cache, snapshots) {
                Ok(store) => {
                    last_good = Some(store.clone());
                    store
                }
                Err(e @ (RunlineError::Convergence { .. } | RunlineError::InsufficientData(_))) => {
                    warn!(%date, error = %e, "fit rejected, retaining previous posterior");
                    match &last_good {
                        Some(prev) => prev.clone(),
                        None => match snapshots.latest_posterior()? {
                            Some(prev) => Arc::new(prev),
                            None => {
                                warn!(%date, "no usable posterior, serving no predictions");
                                checkpoint.mark_done(date);
                                snapshots.save_checkpoint(&checkpoint)?;
                                continue;
                            }
                        },
                    }
                }
                Err(e) => return Err(e),
            };

            // The date's store is fixed; games within the date are
            // independent from here on
            let simulator = Simulator::new(&store, &self.cfg.sim);
            let records: Vec<BacktestRecord> = todays
                .par_iter()
                .filter_map(|obs| self.score_game(obs, date, &store, &simulator, market))
                .collect();

            for record in &records {
                ledger.append(record)?;
            }
            info!(%date, games = todays.len(), ledgered = records.len(), "date complete");

            checkpoint.mark_done(date);
            snapshots.save_checkpoint(&checkpoint)?;
        }

        let all = ledger.read_all()?;
        Ok(calibration_report(
            &all,
            self.cfg.validator.reliability_bins,
            &self.cfg.validator.roi_thresholds,
        ))
    }

    fn posterior_for(
        &self,
        date: NaiveDate,
        training: &[GameObservation],
        cache: &DashMap<(i32, u32), Arc<PosteriorStore>>,
        snapshots: &SnapshotStore,
    ) -> Result<Arc<PosteriorStore>> {
        let key = fit_week(date);
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }
        // Refits are expensive; one per fit week serves every date inside it
        let store = Arc::new(fit_run_event_model(
            training,
            date,
            self.seeds,
            &self.cfg.model,
        )?);
        snapshots.save_posterior(&store)?;
        cache.insert(key, store.clone());
        Ok(store)
    }

    fn score_game(
        &self,
        obs: &GameObservation,
        date: NaiveDate,
        store: &PosteriorStore,
        simulator: &Simulator<'_>,
        market: &MarketData,
    ) -> Option<BacktestRecord> {
        let matchup = matchup_from_observation(obs);
        let sim = match simulator.simulate(&matchup) {
            Ok(sim) => sim,
            Err(e) => {
                warn!(game_id = obs.game_id(), error = %e, "simulation skipped");
                return None;
            }
        };

        let closing = market.quotes.get(&obs.game_id()).and_then(|quotes| {
            let cutoff = market
                .commence
                .get(&obs.game_id())
                .copied()
                .unwrap_or_else(|| {
                    DateTime::from_naive_utc_and_offset(
                        date.and_hms_opt(23, 59, 59).unwrap(),
                        Utc,
                    )
                });
            match closing_snapshot(quotes, cutoff, self.cfg) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(game_id = obs.game_id(), error = %e, "market excluded from comparison");
                    None
                }
            }
        });

        let market_fair_home = closing
            .as_ref()
            .and_then(|(devig, _, _)| devig.fair_for(OutcomeSide::Home));
        let home_decimal_odds = closing.as_ref().and_then(|(_, h, _)| *h);
        let away_decimal_odds = closing.as_ref().and_then(|(_, _, a)| *a);

        let edge_home = market_fair_home.map(|m| sim.p_home_win - m);
        let threshold = self.cfg.detector.edge_threshold;
        let (flagged, flagged_won) = match edge_home {
            Some(edge) if edge > threshold => (true, Some(obs.winner_home())),
            Some(edge) if -edge > threshold => (true, Some(!obs.winner_home())),
            _ => (false, None),
        };

        Some(BacktestRecord {
            game_id: obs.game_id(),
            as_of: date,
            fit_date: store.fit_date,
            model_prob_home: sim.p_home_win,
            market_fair_home,
            home_decimal_odds,
            away_decimal_odds,
            realized_home_win: obs.winner_home(),
            edge_home,
            flagged,
            flagged_won,
            recorded_at: Utc::now(),
        })
    }
}

/// Build the matchup a validator date sees: ids only, starters when the
/// observation carries them
pub fn matchup_from_observation(obs: &GameObservation) -> Matchup {
    match obs {
        GameObservation::FullRunEvent(g) => Matchup {
            game_id: g.game_id,
            home_team: g.home.team_id,
            away_team: g.away.team_id,
            home_pitcher: (g.home.starting_pitcher_id != UNKNOWN_PITCHER)
                .then_some(g.home.starting_pitcher_id),
            away_pitcher: (g.away.starting_pitcher_id != UNKNOWN_PITCHER)
                .then_some(g.away.starting_pitcher_id),
            neutral_site: g.neutral_site,
        },
        GameObservation::ScoreOnly(g) => Matchup {
            game_id: g.game_id,
            home_team: g.home_team_id,
            away_team: g.away_team_id,
            home_pitcher: None,
            away_pitcher: None,
            neutral_site: g.neutral_site,
        },
    }
}

/// Latest devigable pre-start moneyline snapshot plus its payout odds
fn closing_snapshot(
    quotes: &[MarketQuote],
    cutoff: DateTime<Utc>,
    cfg: &AppConfig,
) -> Result<(DevigResult, Option<f64>, Option<f64>)> {
    // (bookmaker, timestamp) -> snapshot
    let mut snapshots: HashMap<(u32, DateTime<Utc>), Vec<&MarketQuote>> = HashMap::new();
    for q in quotes {
        if q.kind == MarketKind::Moneyline && q.timestamp < cutoff {
            snapshots.entry((q.bookmaker_id, q.timestamp)).or_default().push(q);
        }
    }
    let mut keys: Vec<(u32, DateTime<Utc>)> = snapshots.keys().copied().collect();
    keys.sort_by_key(|(book, ts)| (std::cmp::Reverse(*ts), *book));

    let mut last_err: Option<RunlineError> = None;
    for key in keys {
        let snapshot: Vec<MarketQuote> =
            snapshots[&key].iter().map(|q| (*q).clone()).collect();
        match devig_market(&snapshot, &cfg.devig) {
            Ok(devig) => {
                let odds_for = |side: OutcomeSide| {
                    snapshot
                        .iter()
                        .find(|q| q.outcome == side)
                        .and_then(|q| q.decimal_odds())
                };
                let home = odds_for(OutcomeSide::Home);
                let away = odds_for(OutcomeSide::Away);
                return Ok((devig, home, away));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| RunlineError::DevigInfeasible {
        market: "moneyline".to_string(),
        reason: "no pre-start snapshots".to_string(),
    }))
}

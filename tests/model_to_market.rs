//! Fit-to-detection pipeline: the posterior a fit produces drives the
//! simulator, and the simulator output drives value detection against a
//! devigged market.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use runline::config::AppConfig;
use runline::domain::market::{MarketKind, MarketQuote, OutcomeSide};
use runline::domain::observation::{
    FullRunEventGame, GameObservation, RunEventCounts, SideEvents,
};
use runline::model::fit::{fit_run_event_model, FitData};
use runline::sim::monte_carlo::{Matchup, Simulator};
use runline::strategy::detector::ValueDetector;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

fn side(team_id: u32, pitcher: u32, counts: [u32; 4]) -> SideEvents {
    SideEvents {
        team_id,
        starting_pitcher_id: pitcher,
        events: RunEventCounts {
            run1: counts[0],
            run2: counts[1],
            run3: counts[2],
            run4: counts[3],
        },
        final_score: counts[0] + 2 * counts[1] + 3 * counts[2] + 4 * counts[3],
    }
}

/// Team 1 scores in bunches, team 2 barely scores
fn lopsided_season() -> Vec<GameObservation> {
    let mut games = Vec::new();
    let mut id = 0u64;
    for day in 1..=12 {
        id += 1;
        games.push(GameObservation::FullRunEvent(FullRunEventGame {
            game_id: id,
            season: 2026,
            game_date: date(day),
            neutral_site: false,
            home: side(1, 101, [5, 2, 1, 0]),
            away: side(2, 201, [1, 0, 0, 0]),
        }));
        id += 1;
        games.push(GameObservation::FullRunEvent(FullRunEventGame {
            game_id: id,
            season: 2026,
            game_date: date(day),
            neutral_site: false,
            home: side(2, 201, [2, 0, 0, 0]),
            away: side(1, 101, [4, 2, 0, 0]),
        }));
    }
    games
}

fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.model.chains = 2;
    cfg.model.warmup = 150;
    cfg.model.draws_per_chain = 40;
    cfg.model.thin = 1;
    cfg.model.max_rhat = 5.0;
    cfg.model.min_ess = 2.0;
    cfg.sim.draws = 2_000;
    cfg
}

fn even_quotes(game_id: u64) -> Vec<MarketQuote> {
    [OutcomeSide::Home, OutcomeSide::Away]
        .into_iter()
        .map(|outcome| MarketQuote {
            game_id,
            bookmaker_id: 1,
            kind: MarketKind::Moneyline,
            outcome,
            price: Decimal::from(-110),
            point: None,
            timestamp: Utc::now(),
        })
        .collect()
}

#[test]
fn fitted_posterior_prices_the_stronger_team_as_favorite() {
    let games = lopsided_season();
    let cfg = fast_config();
    let store = fit_run_event_model(&games, date(13), &[], &cfg.model).expect("fit");

    let simulator = Simulator::new(&store, &cfg.sim);
    let result = simulator
        .simulate(&Matchup {
            game_id: 99,
            home_team: 1,
            away_team: 2,
            home_pitcher: Some(101),
            away_pitcher: Some(201),
            neutral_site: true,
        })
        .unwrap();

    assert!(
        result.p_home_win > 0.6,
        "fitted favorite should dominate: p={}",
        result.p_home_win
    );
    assert!(result.mean_home_runs > result.mean_away_runs);
    // Histogram mass equals the draw budget
    let mass: u64 = result.total_runs_histogram.iter().sum();
    assert_eq!(mass as usize, result.draws_used);
}

#[test]
fn corrupt_record_is_excluded_but_fit_proceeds() {
    let mut games = lopsided_season();
    if let GameObservation::FullRunEvent(g) = &mut games[0] {
        // Counts imply 3 runs; the claimed final score does not reconcile
        g.home.events = RunEventCounts { run1: 1, run2: 1, run3: 0, run4: 0 };
        g.home.final_score = 5;
    }
    let bad_id = games[0].game_id();

    let data = FitData::assemble(&games, date(13)).unwrap();
    assert_eq!(data.excluded.len(), 1);
    assert_eq!(data.excluded[0].0, bad_id);

    let cfg = fast_config();
    let store = fit_run_event_model(&games, date(13), &[], &cfg.model).expect("fit survives");
    assert!(store.n_draws() > 0);
}

#[test]
fn detector_flags_the_mispriced_side_from_a_real_fit() {
    let games = lopsided_season();
    let cfg = fast_config();
    let store = fit_run_event_model(&games, date(13), &[], &cfg.model).unwrap();

    let detector = ValueDetector::new(&cfg.detector, &cfg.blend, &cfg.devig, &cfg.sim);
    let matchup = Matchup {
        game_id: 99,
        home_team: 1,
        away_team: 2,
        home_pitcher: None,
        away_pitcher: None,
        neutral_site: true,
    };
    // The book prices a near coin flip; the model knows better. 30 games
    // played: the blend trusts the model.
    let recs = detector
        .detect(&matchup, &even_quotes(99), &store, 30)
        .unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].side, OutcomeSide::Home);
    assert!(recs[0].stake_fraction > 0.0);
    assert!(recs[0].stake_fraction <= cfg.detector.max_stake_fraction);

    // Determinism: identical inputs, identical edge and stake
    let again = detector
        .detect(&matchup, &even_quotes(99), &store, 30)
        .unwrap();
    assert_eq!(recs[0].edge, again[0].edge);
    assert_eq!(recs[0].stake_fraction, again[0].stake_fraction);
}

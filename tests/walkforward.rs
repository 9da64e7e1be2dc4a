//! End-to-end walk-forward validation: fit, simulate, devig, ledger,
//! quota pause and resume.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use runline::backtest::{Ledger, MarketData, WalkForwardValidator};
use runline::config::AppConfig;
use runline::domain::market::{MarketKind, MarketQuote, OutcomeSide};
use runline::domain::observation::{
    FullRunEventGame, GameObservation, RunEventCounts, ScoreOnlyGame, SideEvents,
};
use runline::error::RunlineError;
use runline::market::QuotaBudget;
use runline::persistence::SnapshotStore;

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

/// Team 1 consistently outhits team 2
fn season() -> Vec<GameObservation> {
    let mut games = Vec::new();
    let mut id = 0u64;
    for day in 1..=10 {
        id += 1;
        games.push(GameObservation::FullRunEvent(FullRunEventGame {
            game_id: id,
            season: 2026,
            game_date: date(day),
            neutral_site: false,
            home: side(1, 101, [4, 1, 0, 0]),
            away: side(2, 201, [2, 0, 0, 0]),
        }));
        id += 1;
        games.push(GameObservation::FullRunEvent(FullRunEventGame {
            game_id: id,
            season: 2026,
            game_date: date(day),
            neutral_site: false,
            home: side(2, 201, [1, 1, 0, 0]),
            away: side(1, 101, [3, 2, 0, 0]),
        }));
    }
    // Validation days: two games each, with realized outcomes
    for day in 11..=12 {
        id += 1;
        games.push(GameObservation::ScoreOnly(ScoreOnlyGame {
            game_id: id,
            season: 2026,
            game_date: date(day),
            neutral_site: false,
            home_team_id: 1,
            away_team_id: 2,
            home_score: 6,
            away_score: 2,
        }));
        id += 1;
        games.push(GameObservation::ScoreOnly(ScoreOnlyGame {
            game_id: id,
            season: 2026,
            game_date: date(day),
            neutral_site: false,
            home_team_id: 2,
            away_team_id: 1,
            home_score: 3,
            away_score: 5,
        }));
    }
    games
}

fn quotes_for(games: &[GameObservation]) -> MarketData {
    let mut market = MarketData::default();
    for obs in games {
        let day = obs.game_date();
        if day < date(11) {
            continue;
        }
        let ts = Utc.with_ymd_and_hms(2026, 3, day.day(), 9, 0, 0).unwrap();
        let quote = |outcome, price: i64| MarketQuote {
            game_id: obs.game_id(),
            bookmaker_id: 1,
            kind: MarketKind::Moneyline,
            outcome,
            price: Decimal::from(price),
            point: None,
            timestamp: ts,
        };
        market.quotes.insert(
            obs.game_id(),
            vec![quote(OutcomeSide::Home, -115), quote(OutcomeSide::Away, -105)],
        );
    }
    market
}

fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.model.chains = 2;
    cfg.model.warmup = 100;
    cfg.model.draws_per_chain = 30;
    cfg.model.thin = 1;
    cfg.model.max_rhat = 5.0;
    cfg.model.min_ess = 2.0;
    cfg.sim.draws = 500;
    cfg
}

#[test]
fn walkforward_ledgers_every_game_with_market_comparison() {
    let dir = format!("/tmp/runline_it_wf_{}", std::process::id());
    let snapshots = SnapshotStore::new(&dir).unwrap();
    let ledger = Ledger::new(format!("{}/ledger.jsonl", dir));

    let games = season();
    let market = quotes_for(&games);
    let cfg = fast_config();
    let validator = WalkForwardValidator::new(&cfg, &[]);

    let report = validator
        .run(&games, &[date(11), date(12)], &market, &ledger, &snapshots, None)
        .expect("walk-forward run");

    assert_eq!(report.n_records, 4);
    let records = ledger.read_all().unwrap();
    assert_eq!(records.len(), 4);
    for r in &records {
        // Temporal causality: the posterior never postdates the prediction
        assert!(r.fit_date <= r.as_of);
        assert!(r.market_fair_home.is_some());
        assert!(r.model_prob_home > 0.0 && r.model_prob_home < 1.0);
        let fair = r.market_fair_home.unwrap();
        assert!((r.edge_home.unwrap() - (r.model_prob_home - fair)).abs() < 1e-12);
    }
    // Both validation days sit in one ISO week: one fit serves both
    assert!(records.iter().all(|r| r.fit_date == date(11)));
    assert!(report.brier_score.is_finite());
    assert!(report.log_loss.is_finite());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn walkforward_pauses_on_quota_and_resumes_without_recomputation() {
    let dir = format!("/tmp/runline_it_quota_{}", std::process::id());
    let snapshots = SnapshotStore::new(&dir).unwrap();
    let ledger = Ledger::new(format!("{}/ledger.jsonl", dir));

    let games = season();
    let market = quotes_for(&games);
    let cfg = fast_config();
    let validator = WalkForwardValidator::new(&cfg, &[]);
    let dates = [date(11), date(12)];

    // Budget covers only the first date's two games
    let mut budget = QuotaBudget::new(2);
    let err = validator
        .run(&games, &dates, &market, &ledger, &snapshots, Some(&mut budget))
        .unwrap_err();
    assert!(matches!(err, RunlineError::QuotaExhausted { .. }));
    // Partial progress persisted: first date ledgered before the pause
    assert_eq!(ledger.read_all().unwrap().len(), 2);

    // New window: fresh budget, same ledger and checkpoint
    let mut budget = QuotaBudget::new(10);
    let report = validator
        .run(&games, &dates, &market, &ledger, &snapshots, Some(&mut budget))
        .expect("resumed run");
    assert_eq!(report.n_records, 4);
    // Only the second date's games were fetched after the resume
    assert_eq!(budget.used, 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn walkforward_skips_infeasible_markets_without_guessing() {
    let dir = format!("/tmp/runline_it_nomarket_{}", std::process::id());
    let snapshots = SnapshotStore::new(&dir).unwrap();
    let ledger = Ledger::new(format!("{}/ledger.jsonl", dir));

    let games = season();
    // One-sided market for every validation game
    let mut market = quotes_for(&games);
    for quotes in market.quotes.values_mut() {
        quotes.retain(|q| q.outcome == OutcomeSide::Home);
    }

    let cfg = fast_config();
    let validator = WalkForwardValidator::new(&cfg, &[]);
    let report = validator
        .run(&games, &[date(11)], &market, &ledger, &snapshots, None)
        .unwrap();

    assert_eq!(report.n_records, 2);
    for r in &ledger.read_all().unwrap() {
        // Excluded from comparison, never estimated
        assert!(r.market_fair_home.is_none());
        assert!(r.edge_home.is_none());
        assert!(!r.flagged);
    }

    std::fs::remove_dir_all(&dir).ok();
}

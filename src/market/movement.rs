//! Line-movement features from a time-ordered quote sequence.
//!
//! Computed per game from moneyline snapshots across bookmakers: where the
//! fair price opened, where it closed, the largest single-interval move and
//! when it happened, and how much of the book agreed on direction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DevigConfig;
use crate::domain::ids::GameId;
use crate::domain::market::{MarketQuote, OutcomeSide};
use crate::error::{Result, RunlineError};
use crate::market::devig::devig_market;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineMovementFeatures {
    pub game_id: GameId,
    /// Fair home probability at the first snapshot
    pub opening_fair_home: f64,
    /// Fair home probability at the last snapshot before game start
    pub closing_fair_home: f64,
    /// Largest absolute fair-probability change between consecutive
    /// snapshots of one book
    pub max_interval_shift: f64,
    /// Seconds before game start when that shift landed; None when no book
    /// produced two snapshots
    pub max_shift_secs_before_start: Option<i64>,
    /// Fraction of books whose open-to-close move matched the majority
    /// direction
    pub direction_consensus: f64,
    /// Cross-book mean of closing fair home probabilities
    pub consensus_fair_home: f64,
    pub books_used: usize,
}

/// Compute features from all moneyline quotes for one game.
///
/// Quotes at or after `commence_time` are ignored (the closing number is the
/// last pre-start snapshot). Books whose snapshots cannot be devigged are
/// skipped and logged, not guessed.
pub fn line_movement_features(
    game_id: GameId,
    quotes: &[MarketQuote],
    commence_time: DateTime<Utc>,
    cfg: &DevigConfig,
) -> Result<LineMovementFeatures> {
    // bookmaker -> timestamp -> snapshot quotes
    let mut books: BTreeMap<u32, BTreeMap<DateTime<Utc>, Vec<&MarketQuote>>> = BTreeMap::new();
    for q in quotes {
        if q.game_id != game_id || q.timestamp >= commence_time {
            continue;
        }
        books
            .entry(q.bookmaker_id)
            .or_default()
            .entry(q.timestamp)
            .or_default()
            .push(q);
    }

    // Per book: time-ordered fair home probability series
    let mut series: BTreeMap<u32, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
    for (book, snapshots) in &books {
        let mut points = Vec::new();
        for (ts, snapshot_quotes) in snapshots {
            let owned: Vec<MarketQuote> = snapshot_quotes.iter().map(|q| (*q).clone()).collect();
            match devig_market(&owned, cfg) {
                Ok(result) => {
                    if let Some(p) = result.fair_for(OutcomeSide::Home) {
                        points.push((*ts, p));
                    }
                }
                Err(e) => {
                    debug!(game_id, book, %ts, error = %e, "skipping undeviggable snapshot");
                }
            }
        }
        if !points.is_empty() {
            series.insert(*book, points);
        }
    }

    if series.is_empty() {
        return Err(RunlineError::DevigInfeasible {
            market: format!("{}:moneyline", game_id),
            reason: "no devigable pre-start snapshots".to_string(),
        });
    }

    let opening = series
        .values()
        .filter_map(|points| points.first())
        .min_by_key(|(ts, _)| *ts)
        .map(|(_, p)| *p)
        .unwrap();
    let closing = series
        .values()
        .filter_map(|points| points.last())
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, p)| *p)
        .unwrap();

    let mut max_shift = 0.0;
    let mut max_shift_ts: Option<DateTime<Utc>> = None;
    for points in series.values() {
        for pair in points.windows(2) {
            let shift = (pair[1].1 - pair[0].1).abs();
            if shift > max_shift {
                max_shift = shift;
                max_shift_ts = Some(pair[1].0);
            }
        }
    }
    // Even a flat book reports when its flattest move landed; only
    // single-snapshot books leave this empty
    if max_shift_ts.is_none() {
        max_shift_ts = series
            .values()
            .filter_map(|points| points.windows(2).next().map(|pair| pair[1].0))
            .next();
    }

    let directions: Vec<f64> = series
        .values()
        .map(|points| points.last().unwrap().1 - points.first().unwrap().1)
        .collect();
    let ups = directions.iter().filter(|d| **d > 0.0).count();
    let downs = directions.iter().filter(|d| **d < 0.0).count();
    let direction_consensus = if directions.is_empty() {
        0.0
    } else {
        ups.max(downs) as f64 / directions.len() as f64
    };

    let consensus_fair_home =
        series.values().map(|points| points.last().unwrap().1).sum::<f64>() / series.len() as f64;

    Ok(LineMovementFeatures {
        game_id,
        opening_fair_home: opening,
        closing_fair_home: closing,
        max_interval_shift: max_shift,
        max_shift_secs_before_start: max_shift_ts
            .map(|ts| (commence_time - ts).num_seconds()),
        direction_consensus,
        consensus_fair_home,
        books_used: series.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketKind;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn quote(
        book: u32,
        outcome: OutcomeSide,
        price: i64,
        ts: DateTime<Utc>,
    ) -> MarketQuote {
        MarketQuote {
            game_id: 9,
            bookmaker_id: book,
            kind: MarketKind::Moneyline,
            outcome,
            price: Decimal::from(price),
            point: None,
            timestamp: ts,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 3, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_opening_closing_and_shift() {
        let t0 = start() - Duration::hours(6);
        let t1 = start() - Duration::hours(2);
        let t2 = start() - Duration::minutes(30);
        let quotes = vec![
            // Book 1 steams toward the home side
            quote(1, OutcomeSide::Home, -120, t0),
            quote(1, OutcomeSide::Away, 100, t0),
            quote(1, OutcomeSide::Home, -150, t1),
            quote(1, OutcomeSide::Away, 130, t1),
            quote(1, OutcomeSide::Home, -160, t2),
            quote(1, OutcomeSide::Away, 140, t2),
        ];
        let f =
            line_movement_features(9, &quotes, start(), &DevigConfig::default()).unwrap();
        assert!(f.closing_fair_home > f.opening_fair_home);
        assert!(f.max_interval_shift > 0.0);
        // The big move was the t0 -> t1 jump, recorded at t1
        assert_eq!(f.max_shift_secs_before_start, Some(2 * 3600));
        assert_eq!(f.books_used, 1);
    }

    #[test]
    fn test_direction_consensus_across_books() {
        let t0 = start() - Duration::hours(4);
        let t1 = start() - Duration::hours(1);
        let mut quotes = Vec::new();
        // Books 1 and 2 move home-ward, book 3 moves away-ward
        for book in [1, 2] {
            quotes.push(quote(book, OutcomeSide::Home, -110, t0));
            quotes.push(quote(book, OutcomeSide::Away, -110, t0));
            quotes.push(quote(book, OutcomeSide::Home, -140, t1));
            quotes.push(quote(book, OutcomeSide::Away, 120, t1));
        }
        quotes.push(quote(3, OutcomeSide::Home, -110, t0));
        quotes.push(quote(3, OutcomeSide::Away, -110, t0));
        quotes.push(quote(3, OutcomeSide::Home, 105, t1));
        quotes.push(quote(3, OutcomeSide::Away, -125, t1));

        let f =
            line_movement_features(9, &quotes, start(), &DevigConfig::default()).unwrap();
        assert!((f.direction_consensus - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(f.books_used, 3);
        assert!(f.consensus_fair_home > 0.0 && f.consensus_fair_home < 1.0);
    }

    #[test]
    fn test_quotes_after_start_ignored() {
        let t0 = start() - Duration::hours(1);
        let late = start() + Duration::minutes(5);
        let quotes = vec![
            quote(1, OutcomeSide::Home, -120, t0),
            quote(1, OutcomeSide::Away, 100, t0),
            // In-play drift must not touch the closing number
            quote(1, OutcomeSide::Home, -400, late),
            quote(1, OutcomeSide::Away, 300, late),
        ];
        let f =
            line_movement_features(9, &quotes, start(), &DevigConfig::default()).unwrap();
        assert!((f.closing_fair_home - f.opening_fair_home).abs() < 1e-12);
        assert_eq!(f.max_shift_secs_before_start, None);
    }

    #[test]
    fn test_no_snapshots_is_infeasible() {
        let err = line_movement_features(9, &[], start(), &DevigConfig::default()).unwrap_err();
        assert!(matches!(err, RunlineError::DevigInfeasible { .. }));
    }
}

//! Calibration diagnostics over the backtest ledger.
//!
//! Everything here scores the home-side probability against the realized
//! outcome: Brier score, log loss, a binned reliability curve, and
//! flat-stake ROI at a sweep of edge thresholds.

use serde::{Deserialize, Serialize};

use crate::backtest::ledger::BacktestRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub mean_predicted: f64,
    pub observed_frequency: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiPoint {
    pub threshold: f64,
    pub bets: usize,
    pub wins: usize,
    /// Profit per unit staked, flat one-unit stakes
    pub roi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub n_records: usize,
    pub brier_score: f64,
    pub log_loss: f64,
    pub reliability: Vec<ReliabilityBin>,
    pub roi: Vec<RoiPoint>,
}

/// Mean squared error of the home probability
pub fn brier_score(records: &[BacktestRecord]) -> f64 {
    if records.is_empty() {
        return f64::NAN;
    }
    records
        .iter()
        .map(|r| {
            let y = if r.realized_home_win { 1.0 } else { 0.0 };
            (r.model_prob_home - y).powi(2)
        })
        .sum::<f64>()
        / records.len() as f64
}

/// Mean negative log likelihood of the realized outcomes
pub fn log_loss(records: &[BacktestRecord]) -> f64 {
    if records.is_empty() {
        return f64::NAN;
    }
    records
        .iter()
        .map(|r| {
            let p = r.model_prob_home.clamp(1e-12, 1.0 - 1e-12);
            if r.realized_home_win {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum::<f64>()
        / records.len() as f64
}

/// Binned predicted probability vs observed frequency
pub fn reliability_curve(records: &[BacktestRecord], bins: usize) -> Vec<ReliabilityBin> {
    let bins = bins.max(2);
    let width = 1.0 / bins as f64;
    (0..bins)
        .map(|b| {
            let lower = b as f64 * width;
            let upper = lower + width;
            let in_bin: Vec<&BacktestRecord> = records
                .iter()
                .filter(|r| {
                    let p = r.model_prob_home;
                    p >= lower && (p < upper || (b == bins - 1 && p <= upper))
                })
                .collect();
            let count = in_bin.len();
            let (mean_predicted, observed_frequency) = if count == 0 {
                (f64::NAN, f64::NAN)
            } else {
                let mp = in_bin.iter().map(|r| r.model_prob_home).sum::<f64>() / count as f64;
                let of = in_bin.iter().filter(|r| r.realized_home_win).count() as f64
                    / count as f64;
                (mp, of)
            };
            ReliabilityBin {
                lower,
                upper,
                mean_predicted,
                observed_frequency,
                count,
            }
        })
        .collect()
}

/// Flat-stake ROI at each edge threshold: bet home when
/// `model - market > threshold`, away when the mirrored edge clears it.
/// Records without a usable market or price sit out.
pub fn roi_at_thresholds(records: &[BacktestRecord], thresholds: &[f64]) -> Vec<RoiPoint> {
    thresholds
        .iter()
        .map(|&threshold| {
            let mut bets = 0usize;
            let mut wins = 0usize;
            let mut profit = 0.0;
            for r in records {
                let market = match r.market_fair_home {
                    Some(m) => m,
                    None => continue,
                };
                let edge_home = r.model_prob_home - market;
                let edge_away = (1.0 - r.model_prob_home) - (1.0 - market);
                if edge_home > threshold {
                    if let Some(odds) = r.home_decimal_odds {
                        bets += 1;
                        if r.realized_home_win {
                            wins += 1;
                            profit += odds - 1.0;
                        } else {
                            profit -= 1.0;
                        }
                    }
                } else if edge_away > threshold {
                    if let Some(odds) = r.away_decimal_odds {
                        bets += 1;
                        if !r.realized_home_win {
                            wins += 1;
                            profit += odds - 1.0;
                        } else {
                            profit -= 1.0;
                        }
                    }
                }
            }
            RoiPoint {
                threshold,
                bets,
                wins,
                roi: if bets == 0 { 0.0 } else { profit / bets as f64 },
            }
        })
        .collect()
}

pub fn calibration_report(
    records: &[BacktestRecord],
    bins: usize,
    thresholds: &[f64],
) -> CalibrationReport {
    CalibrationReport {
        n_records: records.len(),
        brier_score: brier_score(records),
        log_loss: log_loss(records),
        reliability: reliability_curve(records, bins),
        roi: roi_at_thresholds(records, thresholds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn record(p: f64, won: bool, market: Option<f64>) -> BacktestRecord {
        BacktestRecord {
            game_id: 1,
            as_of: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            fit_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            model_prob_home: p,
            market_fair_home: market,
            home_decimal_odds: Some(2.0),
            away_decimal_odds: Some(2.0),
            realized_home_win: won,
            edge_home: market.map(|m| p - m),
            flagged: false,
            flagged_won: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_brier_perfect_and_worst() {
        assert!((brier_score(&[record(1.0, true, None)]) - 0.0).abs() < 1e-12);
        assert!((brier_score(&[record(0.0, true, None)]) - 1.0).abs() < 1e-12);
        // Coin flip scores 0.25
        let flips = vec![record(0.5, true, None), record(0.5, false, None)];
        assert!((brier_score(&flips) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_penalizes_confident_misses() {
        let mild = log_loss(&[record(0.6, false, None)]);
        let confident = log_loss(&[record(0.95, false, None)]);
        assert!(confident > mild);
    }

    #[test]
    fn test_reliability_bins_cover_all_records() {
        let records: Vec<BacktestRecord> = (0..100)
            .map(|i| record(i as f64 / 100.0, i % 2 == 0, None))
            .collect();
        let curve = reliability_curve(&records, 10);
        assert_eq!(curve.len(), 10);
        let total: usize = curve.iter().map(|b| b.count).sum();
        assert_eq!(total, records.len());
    }

    #[test]
    fn test_roi_positive_for_clairvoyant_model() {
        // Model knows the outcome, market is always 0.5, even odds
        let records: Vec<BacktestRecord> = (0..40)
            .map(|i| {
                let won = i % 3 != 0;
                record(if won { 0.9 } else { 0.1 }, won, Some(0.5))
            })
            .collect();
        let roi = roi_at_thresholds(&records, &[0.05]);
        assert_eq!(roi.len(), 1);
        assert_eq!(roi[0].bets, records.len());
        // Every bet wins at 2.0 odds
        assert!((roi[0].roi - 1.0).abs() < 1e-12, "roi={}", roi[0].roi);
    }

    #[test]
    fn test_roi_skips_missing_markets() {
        let records = vec![record(0.9, true, None), record(0.9, true, Some(0.5))];
        let roi = roi_at_thresholds(&records, &[0.1]);
        assert_eq!(roi[0].bets, 1);
    }

    #[test]
    fn test_tighter_threshold_fewer_bets() {
        let records: Vec<BacktestRecord> = (0..20)
            .map(|i| record(0.5 + i as f64 * 0.02, true, Some(0.5)))
            .collect();
        let roi = roi_at_thresholds(&records, &[0.02, 0.2]);
        assert!(roi[0].bets >= roi[1].bets);
    }
}

//! Devig engine: strip bookmaker margin from quoted prices.
//!
//! Default is the Power method: raw implied probabilities are raised to a
//! shared exponent solved so the adjusted probabilities sum to one. When the
//! market shows a large favorite-longshot skew the Power symmetry assumption
//! is considered violated and the Shin method is used instead. A market
//! missing a required side fails with `DevigInfeasible` — the missing price
//! is never guessed.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::DevigConfig;
use crate::domain::market::{DevigMethod, DevigResult, MarketQuote, OutcomeSide};
use crate::error::{Result, RunlineError};

/// Devig the quotes of one market (mutually exclusive outcomes, one
/// timestamp, one bookmaker).
pub fn devig_market(quotes: &[MarketQuote], cfg: &DevigConfig) -> Result<DevigResult> {
    let first = quotes.first().ok_or_else(|| RunlineError::DevigInfeasible {
        market: "<empty>".to_string(),
        reason: "no quotes".to_string(),
    })?;
    let market_label = format!("{}:{}", first.game_id, first.kind);

    // Last quote per outcome wins when an outcome repeats
    let mut raw: BTreeMap<&'static str, (OutcomeSide, f64)> = BTreeMap::new();
    for q in quotes {
        if q.kind != first.kind || q.game_id != first.game_id {
            return Err(RunlineError::DevigInfeasible {
                market: market_label.clone(),
                reason: "quotes span multiple markets".to_string(),
            });
        }
        let implied = q.implied_probability().ok_or_else(|| RunlineError::DevigInfeasible {
            market: market_label.clone(),
            reason: format!("invalid price {} for {}", q.price, q.outcome),
        })?;
        raw.insert(q.outcome.as_str(), (q.outcome, implied));
    }

    // A two-way market needs both sides quoted
    let (side, _) = raw.values().next().copied().unwrap();
    if !raw.contains_key(side.opposite().as_str()) || raw.len() < 2 {
        return Err(RunlineError::DevigInfeasible {
            market: market_label,
            reason: format!("missing the {} side", side.opposite()),
        });
    }

    let outcomes: Vec<OutcomeSide> = raw.values().map(|(o, _)| *o).collect();
    let implied: Vec<f64> = raw.values().map(|(_, p)| *p).collect();

    let max_p = implied.iter().cloned().fold(f64::MIN, f64::max);
    let min_p = implied.iter().cloned().fold(f64::MAX, f64::min);
    let skewed = min_p > 0.0 && max_p / min_p > cfg.max_skew_ratio;

    let (fair, method) = if skewed {
        debug!(market = %market_label, ratio = max_p / min_p, "skew heuristic tripped, using Shin");
        (shin_fair(&implied), DevigMethod::Shin)
    } else {
        (power_fair(&implied), DevigMethod::Power)
    };

    let sum: f64 = fair.iter().sum();
    if (sum - 1.0).abs() > cfg.sum_tolerance {
        return Err(RunlineError::DevigInfeasible {
            market: market_label,
            reason: format!("devigged probabilities sum to {}", sum),
        });
    }

    let timestamp = quotes.iter().map(|q| q.timestamp).max().unwrap();
    Ok(DevigResult {
        game_id: first.game_id,
        kind: first.kind,
        fair: outcomes.into_iter().zip(fair).collect(),
        method,
        assumptions_violated: skewed,
        timestamp,
    })
}

/// Power method: fair_i = raw_i^alpha with alpha solved by bisection so the
/// fairs sum to one. The sum is strictly decreasing in alpha for raw_i < 1.
pub fn power_fair(implied: &[f64]) -> Vec<f64> {
    let sum_at = |alpha: f64| implied.iter().map(|p| p.powf(alpha)).sum::<f64>();

    let mut lo = 1e-3;
    let mut hi = 1.0;
    // Expand until the booksum at `hi` drops below one
    while sum_at(hi) > 1.0 && hi < 1e3 {
        lo = hi;
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if sum_at(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-14 {
            break;
        }
    }
    let alpha = 0.5 * (lo + hi);
    let fairs: Vec<f64> = implied.iter().map(|p| p.powf(alpha)).collect();
    normalize_residual(fairs)
}

/// Shin method: corrects for favorite-longshot bias by modeling a fraction z
/// of insider money. Solves z so the fair probabilities sum to one.
pub fn shin_fair(implied: &[f64]) -> Vec<f64> {
    let booksum: f64 = implied.iter().sum();
    let fair_at = |z: f64| -> Vec<f64> {
        implied
            .iter()
            .map(|&p| {
                ((z * z + 4.0 * (1.0 - z) * p * p / booksum).sqrt() - z) / (2.0 * (1.0 - z))
            })
            .collect()
    };
    let sum_at = |z: f64| fair_at(z).iter().sum::<f64>();

    // sum_at(0) = booksum / sqrt(booksum) > 1 for an overround book;
    // the sum decreases in z
    let mut lo = 0.0;
    let mut hi = 0.5;
    while sum_at(hi) > 1.0 && hi < 0.999 {
        hi = (hi + 1.0) / 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if sum_at(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-15 {
            break;
        }
    }
    normalize_residual(fair_at(0.5 * (lo + hi)))
}

/// Scale out the residual left by the solver tolerance so sums are exact to
/// floating precision
fn normalize_residual(mut fairs: Vec<f64>) -> Vec<f64> {
    let sum: f64 = fairs.iter().sum();
    if sum > 0.0 {
        for f in fairs.iter_mut() {
            *f /= sum;
        }
    }
    fairs
}

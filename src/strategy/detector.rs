//! Value detector: flag positive-edge opportunities with sizing.
//!
//! Compares live simulator output against the current devigged market,
//! blends toward the market while the season sample is small, and emits an
//! advisory recommendation when the edge clears the threshold. The
//! recommendation is a record, not an action — this module has no side
//! effects beyond returning it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::{BlendConfig, DetectorConfig, DevigConfig, SimConfig};
use crate::domain::ids::GameId;
use crate::domain::market::{MarketQuote, OutcomeSide};
use crate::error::Result;
use crate::market::blend::blend_with_market;
use crate::market::devig::devig_market;
use crate::model::posterior::PosteriorStore;
use crate::sim::monte_carlo::{Matchup, Simulator};

/// Advisory betting recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub game_id: GameId,
    pub side: OutcomeSide,
    pub model_prob: f64,
    pub market_fair_prob: f64,
    /// Model blended toward the market per the maturity weighting
    pub blended_prob: f64,
    pub edge: f64,
    /// Quoted American price backing the stake sizing
    pub price: Decimal,
    pub decimal_odds: f64,
    /// Fraction of bankroll to stake (fractional Kelly, capped)
    pub stake_fraction: f64,
    pub created_at: DateTime<Utc>,
}

/// Fractional Kelly stake for win probability `p` at `decimal_odds`,
/// capped at `max_fraction` of bankroll. Negative-edge inputs stake zero.
pub fn kelly_stake(p: f64, decimal_odds: f64, fraction: f64, max_fraction: f64) -> f64 {
    let b = decimal_odds - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    let q = 1.0 - p;
    let full = (b * p - q) / b;
    (full * fraction).clamp(0.0, max_fraction)
}

pub struct ValueDetector<'a> {
    detector: &'a DetectorConfig,
    blend: &'a BlendConfig,
    devig: &'a DevigConfig,
    sim: &'a SimConfig,
}

impl<'a> ValueDetector<'a> {
    pub fn new(
        detector: &'a DetectorConfig,
        blend: &'a BlendConfig,
        devig: &'a DevigConfig,
        sim: &'a SimConfig,
    ) -> Self {
        Self { detector, blend, devig, sim }
    }

    /// Evaluate one upcoming matchup against the current moneyline quotes.
    ///
    /// Deterministic for a fixed (posterior store, quote set, seed): running
    /// it twice yields identical edges and stakes.
    pub fn detect(
        &self,
        matchup: &Matchup,
        quotes: &[MarketQuote],
        store: &PosteriorStore,
        games_played: u32,
    ) -> Result<Vec<Recommendation>> {
        let simulator = Simulator::new(store, self.sim);
        let sim = simulator.simulate(matchup)?;
        let devig = devig_market(quotes, self.devig)?;

        let market_home = devig.fair_for(OutcomeSide::Home);
        let (blended_home, blended_away) =
            blend_with_market(sim.p_home_win, market_home, games_played, self.blend);

        let now = Utc::now();
        let mut recommendations = Vec::new();
        for (side, model_prob, blended_prob) in [
            (OutcomeSide::Home, sim.p_home_win, blended_home),
            (OutcomeSide::Away, sim.p_away_win, blended_away),
        ] {
            let market_fair = match devig.fair_for(side) {
                Some(p) => p,
                None => continue,
            };
            let edge = blended_prob - market_fair;
            if edge <= self.detector.edge_threshold {
                continue;
            }
            // Best available price for the side backs the sizing
            let best_quote = quotes
                .iter()
                .filter(|q| q.outcome == side)
                .max_by(|a, b| {
                    let ax = a.decimal_odds().unwrap_or(0.0);
                    let bx = b.decimal_odds().unwrap_or(0.0);
                    ax.partial_cmp(&bx).unwrap_or(std::cmp::Ordering::Equal)
                });
            let (price, decimal_odds) = match best_quote.and_then(|q| q.decimal_odds().map(|o| (q.price, o))) {
                Some(pair) => pair,
                None => continue,
            };
            let stake_fraction = kelly_stake(
                blended_prob,
                decimal_odds,
                self.detector.kelly_fraction,
                self.detector.max_stake_fraction,
            );
            if stake_fraction <= 0.0 {
                continue;
            }
            debug!(
                game_id = matchup.game_id,
                %side,
                edge,
                stake_fraction,
                "edge flagged"
            );
            recommendations.push(Recommendation {
                id: Uuid::new_v4(),
                game_id: matchup.game_id,
                side,
                model_prob,
                market_fair_prob: market_fair,
                blended_prob,
                edge,
                price,
                decimal_odds,
                stake_fraction,
                created_at: now,
            });
        }
        Ok(recommendations)
    }
}

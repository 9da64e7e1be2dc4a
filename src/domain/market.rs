//! Market quotes and devigged fair probabilities.
//!
//! Quotes are immutable and append-only, ordered by timestamp per game. The
//! devig engine consumes the quotes for one market (mutually exclusive
//! outcomes) at one timestamp and produces sum-to-one fair probabilities.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::ids::GameId;

/// Market kind offered by bookmakers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Moneyline,
    Runline,
    Total,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Runline => "runline",
            MarketKind::Total => "total",
        }
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome label within a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSide {
    Home,
    Away,
    Over,
    Under,
}

impl OutcomeSide {
    /// The outcome completing a two-way market
    pub fn opposite(&self) -> Self {
        match self {
            OutcomeSide::Home => OutcomeSide::Away,
            OutcomeSide::Away => OutcomeSide::Home,
            OutcomeSide::Over => OutcomeSide::Under,
            OutcomeSide::Under => OutcomeSide::Over,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSide::Home => "home",
            OutcomeSide::Away => "away",
            OutcomeSide::Over => "over",
            OutcomeSide::Under => "under",
        }
    }
}

impl std::fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bookmaker price for one outcome at one moment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub game_id: GameId,
    pub bookmaker_id: u32,
    pub kind: MarketKind,
    pub outcome: OutcomeSide,
    /// American odds (e.g. -150, +130)
    pub price: Decimal,
    /// Handicap or total line; None for moneyline
    pub point: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MarketQuote {
    /// Raw implied probability of this price (overround included)
    pub fn implied_probability(&self) -> Option<f64> {
        american_to_implied(self.price.to_f64()?)
    }

    /// Decimal-odds payout multiplier for a winning one-unit stake
    /// (profit = decimal_odds - 1)
    pub fn decimal_odds(&self) -> Option<f64> {
        let american = self.price.to_f64()?;
        if american >= 100.0 {
            Some(1.0 + american / 100.0)
        } else if american <= -100.0 {
            Some(1.0 + 100.0 / -american)
        } else {
            None
        }
    }
}

/// Convert American odds to implied probability (overround included).
/// Returns None for prices inside (-100, 100), which are not valid American odds.
pub fn american_to_implied(american: f64) -> Option<f64> {
    if american >= 100.0 {
        Some(100.0 / (american + 100.0))
    } else if american <= -100.0 {
        Some(-american / (-american + 100.0))
    } else {
        None
    }
}

/// Devig algorithm applied to a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevigMethod {
    Power,
    Shin,
}

/// Fair (sum-to-one) probabilities for one market snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevigResult {
    pub game_id: GameId,
    pub kind: MarketKind,
    pub fair: Vec<(OutcomeSide, f64)>,
    pub method: DevigMethod,
    /// True when the chosen method's assumptions were violated (e.g. the
    /// asymmetry heuristic forced the Shin fallback)
    pub assumptions_violated: bool,
    pub timestamp: DateTime<Utc>,
}

impl DevigResult {
    pub fn fair_for(&self, outcome: OutcomeSide) -> Option<f64> {
        self.fair
            .iter()
            .find(|(o, _)| *o == outcome)
            .map(|(_, p)| *p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_american_to_implied_favorite() {
        let p = american_to_implied(-150.0).unwrap();
        // 150 / 250 = 0.6
        assert!((p - 0.6).abs() < 1e-12, "p={}", p);
    }

    #[test]
    fn test_american_to_implied_underdog() {
        let p = american_to_implied(130.0).unwrap();
        // 100 / 230
        assert!((p - 100.0 / 230.0).abs() < 1e-12, "p={}", p);
    }

    #[test]
    fn test_invalid_american_price() {
        assert!(american_to_implied(50.0).is_none());
        assert!(american_to_implied(-50.0).is_none());
    }

    #[test]
    fn test_decimal_odds() {
        let quote = MarketQuote {
            game_id: 1,
            bookmaker_id: 1,
            kind: MarketKind::Moneyline,
            outcome: OutcomeSide::Away,
            price: dec!(130),
            point: None,
            timestamp: Utc::now(),
        };
        assert!((quote.decimal_odds().unwrap() - 2.3).abs() < 1e-12);
    }
}

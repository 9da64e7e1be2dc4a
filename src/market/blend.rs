//! Market blend: respect the market while the season sample is tiny.
//!
//! `alpha` is the weight on the market term and decays linearly in games
//! played: a team three games into the season leans heavily on the devigged
//! market, a team thirty games in runs on the model alone.

use crate::config::BlendConfig;

/// Blend the model's home win probability with the devigged market fair.
///
/// Returns (home, away). A missing or degenerate market fair leaves the
/// model probability untouched.
pub fn blend_with_market(
    model_home: f64,
    market_fair_home: Option<f64>,
    games_played: u32,
    cfg: &BlendConfig,
) -> (f64, f64) {
    let market = match market_fair_home {
        Some(p) if p > 0.0 && p < 1.0 => p,
        _ => return (model_home, 1.0 - model_home),
    };
    let alpha = market_weight(games_played, cfg);
    let blended = ((1.0 - alpha) * model_home + alpha * market).clamp(0.01, 0.99);
    (blended, 1.0 - blended)
}

/// Weight assigned to the market term for a given in-season sample size
pub fn market_weight(games_played: u32, cfg: &BlendConfig) -> f64 {
    let n = games_played.min(cfg.games_full_model) as f64;
    cfg.alpha_max * (1.0 - n / cfg.games_full_model as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_weight_larger_early_season() {
        let cfg = BlendConfig::default();
        let early = market_weight(3, &cfg);
        let late = market_weight(30, &cfg);
        assert!(
            early > late,
            "weight at 3 games ({}) must exceed weight at 30 ({})",
            early,
            late
        );
        assert!((late - 0.0).abs() < 1e-12);
        assert!((market_weight(0, &cfg) - cfg.alpha_max).abs() < 1e-12);
    }

    #[test]
    fn test_blend_moves_model_toward_market() {
        let cfg = BlendConfig::default();
        let (blended, away) = blend_with_market(0.70, Some(0.50), 5, &cfg);
        assert!(blended < 0.70 && blended > 0.50, "blended={}", blended);
        assert!((blended + away - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_market_passes_model_through() {
        let cfg = BlendConfig::default();
        assert_eq!(blend_with_market(0.65, None, 3, &cfg), (0.65, 0.35));
        // Degenerate fairs are treated as missing, not trusted
        assert_eq!(blend_with_market(0.65, Some(0.0), 3, &cfg), (0.65, 0.35));
    }

    #[test]
    fn test_blend_clamped_away_from_certainty() {
        let cfg = BlendConfig {
            alpha_max: 1.0,
            games_full_model: 25,
        };
        let (blended, _) = blend_with_market(0.999, Some(0.9999), 0, &cfg);
        assert!(blended <= 0.99);
    }
}

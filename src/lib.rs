pub mod backtest;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod market;
pub mod model;
pub mod persistence;
pub mod sim;
pub mod strategy;

pub use backtest::{BacktestRecord, CalibrationReport, Ledger, MarketData, WalkForwardValidator};
pub use config::AppConfig;
pub use domain::{DevigResult, GameObservation, MarketQuote, PitcherRating, TeamSeasonRating};
pub use error::{Result, RunlineError};
pub use market::{devig_market, line_movement_features, QuotaBudget};
pub use model::{fit_run_event_model, PosteriorStore};
pub use persistence::SnapshotStore;
pub use sim::{Matchup, SimulationResult, Simulator};
pub use strategy::{Recommendation, ValueDetector};

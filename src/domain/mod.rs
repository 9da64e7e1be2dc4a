//! Core domain types shared across the model, simulator, and market layers.

pub mod ids;
pub mod market;
pub mod observation;
pub mod rating;

pub use ids::{ConferenceId, GameId, PitcherId, Season, TeamId, UNKNOWN_PITCHER};
pub use market::{
    american_to_implied, DevigMethod, DevigResult, MarketKind, MarketQuote, OutcomeSide,
};
pub use observation::{
    FullRunEventGame, GameObservation, RunEventCounts, ScoreOnlyGame, SideEvents,
};
pub use rating::{PitcherRating, Provenance, TeamSeasonRating};

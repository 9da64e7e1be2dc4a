//! Rating models: the hierarchical run-event model, its priors and
//! posterior machinery, and the sequential Elo baseline.

pub mod elo;
pub mod fit;
pub mod likelihood;
pub mod posterior;
pub mod priors;

pub use elo::{fit_elo, prior_win_prob, win_prob_from_elo, EloTable};
pub use fit::{fit_run_event_model, team_ratings_from_store, FitData};
pub use likelihood::{EventDistribution, EventType, EVENT_TYPES};
pub use posterior::{ConvergenceDiagnostics, ParamLayout, PosteriorDraw, PosteriorStore};
pub use priors::{build_seeds, ReturningProduction};

//! Monte Carlo simulation over posterior draws.

pub mod monte_carlo;

pub use monte_carlo::{Matchup, SimulationResult, Simulator};

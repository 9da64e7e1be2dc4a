use thiserror::Error;

/// Main error type for the prediction engine
#[derive(Error, Debug)]
pub enum RunlineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Data integrity errors
    #[error("Data integrity error for game {game_id}: {reason}")]
    DataIntegrity { game_id: u64, reason: String },

    // Model fitting errors
    #[error("Fit did not converge: {reason} (max rhat {max_rhat:.4}, min ess {min_ess:.1})")]
    Convergence {
        reason: String,
        max_rhat: f64,
        min_ess: f64,
    },

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    // Temporal causality errors
    #[error("Lookahead violation: training record for game {game_id} dated {game_date} >= validation date {as_of}")]
    Lookahead {
        game_id: u64,
        game_date: chrono::NaiveDate,
        as_of: chrono::NaiveDate,
    },

    // Market errors
    #[error("Devig infeasible for market {market}: {reason}")]
    DevigInfeasible { market: String, reason: String },

    #[error("Quote unavailable for game {game_id}")]
    QuoteUnavailable { game_id: u64 },

    // External feed budget errors
    #[error("Quota exhausted: {used} requests used, {requested} more requested")]
    QuotaExhausted { used: u32, requested: u32 },

    // Persistence errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RunlineError
pub type Result<T> = std::result::Result<T, RunlineError>;

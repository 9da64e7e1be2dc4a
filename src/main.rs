use clap::Parser;
use runline::cli::{self, Cli, Commands};
use runline::config::AppConfig;
use runline::error::{Result, RunlineError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config);
    if let Err(errors) = config.validate() {
        for e in &errors {
            tracing::error!("config: {}", e);
        }
        return Err(RunlineError::Validation(errors.join("; ")));
    }

    match &cli.command {
        Commands::Fit { observations, as_of, seeds } => {
            cli::run_fit(&config, observations, *as_of, seeds.as_ref())?;
        }
        Commands::Project {
            observations,
            home_team,
            away_team,
            home_pitcher,
            away_pitcher,
            neutral,
            market_fair_home,
            n_games,
        } => {
            cli::run_project(
                &config,
                observations,
                *home_team,
                *away_team,
                *home_pitcher,
                *away_pitcher,
                *neutral,
                *market_fair_home,
                *n_games,
            )?;
        }
        Commands::Backtest { observations, quotes, start, end, ledger, quota } => {
            cli::run_backtest(
                &config,
                observations,
                quotes.as_ref(),
                *start,
                *end,
                ledger.as_ref(),
                *quota,
            )?;
        }
        Commands::Detect {
            quotes,
            game_id,
            home_team,
            away_team,
            home_pitcher,
            away_pitcher,
            neutral,
            n_games,
        } => {
            cli::run_detect(
                &config,
                quotes,
                *game_id,
                *home_team,
                *away_team,
                *home_pitcher,
                *away_pitcher,
                *neutral,
                *n_games,
            )?;
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

//! gridcast-ingest - F1 data backfill, alignment and race scoring
//!
//! `backfill` fills qualifying, pit stop and lap time gaps for every stored
//! race by walking each category's source fallback chain. `align` rebuilds
//! the per-driver feature table. `predict` scores one race.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridcast_common::config::{self, SeasonRange, TomlConfig};
use gridcast_ingest::services::scoring::{predict_race, LinearScorer, RaceContext, Scorer};
use gridcast_ingest::types::RaceKey;
use gridcast_ingest::Pipeline;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for gridcast-ingest
#[derive(Parser, Debug)]
#[command(name = "gridcast-ingest")]
#[command(about = "Multi-source F1 data backfill and race outcome scoring")]
#[command(version)]
struct Args {
    /// Root folder holding the canonical database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "GRIDCAST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Debug, Default)]
struct SeasonArgs {
    /// First season (inclusive)
    #[arg(long)]
    start_season: Option<i32>,

    /// Last season (inclusive)
    #[arg(long)]
    end_season: Option<i32>,
}

impl SeasonArgs {
    fn resolve(&self, config: &TomlConfig) -> Result<SeasonRange> {
        let range = SeasonRange::new(
            self.start_season.unwrap_or(config.seasons.first),
            self.end_season.unwrap_or(config.seasons.last),
        )?;
        Ok(range)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill missing qualifying, pit stop and lap time data (default)
    Backfill {
        #[command(flatten)]
        seasons: SeasonArgs,

        /// Seed race rosters from the results API for seasons with none stored
        #[arg(long)]
        bootstrap_schedule: bool,
    },

    /// Rebuild aligned feature rows
    Align {
        #[command(flatten)]
        seasons: SeasonArgs,
    },

    /// Score one race
    Predict {
        #[arg(long)]
        season: i32,

        #[arg(long)]
        round: i32,

        /// JSON race context (telemetry overrides and weather)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Rain probability in percent, overrides the context file
        #[arg(long)]
        rain_probability: Option<f64>,

        /// Air temperature in °C, overrides the context file
        #[arg(long)]
        air_temperature: Option<f64>,
    },
}

fn load_context(path: Option<&Path>) -> Result<RaceContext> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read race context {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid race context {}", path.display()))
        }
        None => Ok(RaceContext::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gridcast-ingest v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    config::ensure_root_folder(&root_folder).context("Failed to initialize root folder")?;
    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = gridcast_ingest::db::init_database_pool(&db_path)
        .await
        .context("Failed to open canonical store")?;
    let pipeline = Pipeline::from_config(pool.clone(), &toml_config)
        .context("Failed to configure sources")?;

    let command = args.command.unwrap_or(Command::Backfill {
        seasons: SeasonArgs::default(),
        bootstrap_schedule: false,
    });

    match command {
        Command::Backfill {
            seasons,
            bootstrap_schedule,
        } => {
            let range = seasons.resolve(&toml_config)?;
            let report = pipeline.orchestrator.run(range, bootstrap_schedule).await?;
            for line in report.display_lines() {
                println!("{}", line);
            }
        }

        Command::Align { seasons } => {
            let range = seasons.resolve(&toml_config)?;
            let rows = pipeline.aligner.project_range(&pipeline.catalog, range).await?;
            println!("Aligned {} feature rows for seasons {}-{}", rows, range.first, range.last);
        }

        Command::Predict {
            season,
            round,
            context,
            rain_probability,
            air_temperature,
        } => {
            let race = RaceKey::new(season, round);
            let mut race_context = load_context(context.as_deref())?;
            if let Some(rain) = rain_probability {
                race_context.weather.rain_probability = rain;
            }
            if let Some(air) = air_temperature {
                race_context.weather.air_temperature = air;
            }

            let scorer = match &toml_config.model_path {
                Some(path) => LinearScorer::from_file(path)?,
                None => LinearScorer::default(),
            };

            let mut rows = gridcast_ingest::db::features::for_race(&pool, race).await?;
            if rows.is_empty() {
                rows = pipeline.aligner.rebuild(race).await?;
            }

            let scorer: &dyn Scorer = &scorer;
            let predictions = predict_race(scorer, &rows, &race_context)
                .with_context(|| format!("Failed to score {}", race))?;

            println!(
                "{:<4} {:<20} {:<5} {:>8} {:>8} {:>8}",
                "Pos", "Driver", "Grid", "Win%", "Podium%", "Points%"
            );
            for p in &predictions {
                println!(
                    "{:<4} {:<20} {:<5} {:>8.1} {:>8.1} {:>8.1}",
                    p.predicted_position,
                    p.driver_id,
                    p.grid,
                    p.win_probability,
                    p.podium_probability,
                    p.points_probability
                );
            }
        }
    }

    Ok(())
}

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use stockpipe::{
    commands::{apply, materialize, process, train},
    config::{OutputPaths, PipelineSettings, DEFAULT_MODEL_ARTIFACT, DEFAULT_RAW_DIRS},
    context::AppContext,
};

#[derive(Parser)]
#[command(name = "stockpipe")]
#[command(about = "Minute-bar feature pipeline and stock direction model trainer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build feature snapshots and the train/test split from raw CSV files
    Process {
        /// Directory to scan for raw CSVs (repeatable)
        #[arg(long = "raw-dir", value_name = "DIR")]
        raw_dirs: Vec<PathBuf>,
        /// Directory the snapshots and split manifest are written to
        #[arg(long = "out-dir", value_name = "DIR")]
        out_dir: Option<PathBuf>,
        /// Per-symbol fraction of most recent rows held out as test data
        #[arg(long = "test-frac", value_name = "FRAC")]
        test_frac: Option<f64>,
    },
    /// Register the feature view schema with the feature store
    Apply {
        /// Path to the processed feature snapshot
        #[arg(long = "snapshot", value_name = "PATH")]
        snapshot: Option<PathBuf>,
    },
    /// Push the snapshot's feature values into the online store
    Materialize {
        /// Path to the processed feature snapshot
        #[arg(long = "snapshot", value_name = "PATH")]
        snapshot: Option<PathBuf>,
    },
    /// Run the hyperparameter search and register the best model
    Train {
        /// Path to the processed feature snapshot
        #[arg(long = "snapshot", value_name = "PATH")]
        snapshot: Option<PathBuf>,
        /// Where the winning model artifact is written
        #[arg(long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Number of random search trials
        #[arg(long = "trials", default_value_t = train::DEFAULT_TRIALS)]
        trials: usize,
        /// Cap on the most recent rows used for the search
        #[arg(long = "sample-rows", default_value_t = train::DEFAULT_SAMPLE_ROWS)]
        sample_rows: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = PipelineSettings::from_env()?;
    let app_context = AppContext::new(settings);

    info!("Starting stockpipe");

    match cli.command {
        Commands::Process {
            raw_dirs,
            out_dir,
            test_frac,
        } => {
            if let Some(frac) = test_frac {
                if !(0.0..=1.0).contains(&frac) {
                    return Err(anyhow!(
                        "--test-frac must be between 0 and 1 (value: {})",
                        frac
                    ));
                }
            }
            let raw_dirs = resolve_raw_dirs(raw_dirs);
            let output = out_dir.map(OutputPaths::for_dir).unwrap_or_default();
            process::run(&app_context, &raw_dirs, &output, test_frac).await?;
        }
        Commands::Apply { snapshot } => {
            let snapshot = resolve_snapshot_path(snapshot);
            apply::run(&app_context, &snapshot).await?;
        }
        Commands::Materialize { snapshot } => {
            let snapshot = resolve_snapshot_path(snapshot);
            materialize::run(&app_context, &snapshot).await?;
        }
        Commands::Train {
            snapshot,
            output,
            trials,
            sample_rows,
        } => {
            let snapshot = resolve_snapshot_path(snapshot);
            let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_ARTIFACT));
            train::run(&app_context, &snapshot, &output, trials, sample_rows).await?;
        }
    }

    Ok(())
}

fn resolve_raw_dirs(cli_values: Vec<PathBuf>) -> Vec<PathBuf> {
    if !cli_values.is_empty() {
        return cli_values;
    }
    DEFAULT_RAW_DIRS.iter().map(PathBuf::from).collect()
}

fn resolve_snapshot_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| OutputPaths::default().processed_snapshot)
}

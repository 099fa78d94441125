use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_RAW_DIRS: [&str; 2] = ["data/raw/v0", "data/raw/v1"];
pub const DEFAULT_PROCESSED_DIR: &str = "data/processed";
pub const PROCESSED_SNAPSHOT_FILE: &str = "stock_data.bin";
pub const TRAIN_SNAPSHOT_FILE: &str = "train.bin";
pub const TEST_SNAPSHOT_FILE: &str = "test.bin";
pub const SPLIT_MANIFEST_FILE: &str = "splits.json";
pub const DEFAULT_MODEL_ARTIFACT: &str = "best_model.bin";

const DEFAULT_TEST_FRAC: f64 = 0.2;
const DEFAULT_TRACKING_URI: &str = "http://127.0.0.1:5000";
const DEFAULT_EXPERIMENT: &str = "stock_prediction";
const DEFAULT_FEATURE_STORE_URI: &str = "http://127.0.0.1:6566";

/// Explicit runtime configuration for all pipeline stages. Everything the
/// original scripts kept as module-level state lives here and is passed
/// into the command that needs it.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Fraction of each symbol's most recent rows held out as test data.
    pub test_frac: f64,
    /// Experiment-tracking service base URL.
    pub tracking_uri: String,
    /// Experiment name runs are logged under.
    pub experiment_name: String,
    /// Feature-store registry/online-store base URL.
    pub feature_store_uri: String,
}

impl PipelineSettings {
    pub fn from_env() -> Result<Self> {
        let test_frac = require_env_f64("TEST_SIZE", DEFAULT_TEST_FRAC, 0.0, 1.0)?;
        let tracking_uri = env_or_default("MLFLOW_TRACKING_URI", DEFAULT_TRACKING_URI);
        let experiment_name = env_or_default("MLFLOW_EXPERIMENT", DEFAULT_EXPERIMENT);
        let feature_store_uri = env_or_default("FEATURE_STORE_URI", DEFAULT_FEATURE_STORE_URI);

        Ok(Self {
            test_frac,
            tracking_uri,
            experiment_name,
            feature_store_uri,
        })
    }
}

/// Default processed-output locations, relative to the working directory.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub processed_snapshot: PathBuf,
    pub train_snapshot: PathBuf,
    pub test_snapshot: PathBuf,
    pub split_manifest: PathBuf,
}

impl OutputPaths {
    pub fn for_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        Self {
            processed_snapshot: dir.join(PROCESSED_SNAPSHOT_FILE),
            train_snapshot: dir.join(TRAIN_SNAPSHOT_FILE),
            test_snapshot: dir.join(TEST_SNAPSHOT_FILE),
            split_manifest: dir.join(SPLIT_MANIFEST_FILE),
        }
    }
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self::for_dir(DEFAULT_PROCESSED_DIR)
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn require_env_f64(name: &str, default: f64, min: f64, max: f64) -> Result<f64> {
    let Some(raw) = env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };

    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("{} must be a number (value: {})", name, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("{} must be finite (value: {})", name, raw));
    }
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {} (value: {})",
            name,
            min,
            max,
            raw
        ));
    }
    Ok(value)
}

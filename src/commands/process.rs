use crate::config::OutputPaths;
use crate::context::AppContext;
use crate::features::{engineer_features, rows_per_symbol};
use crate::ingest::load_raw_observations;
use crate::snapshot::{save_rows_to_file, save_split_manifest};
use crate::split::chronological_split;
use anyhow::Result;
use log::info;
use std::path::PathBuf;

/// End-to-end offline data pass: read raw CSVs, engineer rolling features
/// and labels, split per symbol chronologically, and write the processed,
/// train, and test snapshots plus the split manifest.
pub async fn run(
    app_context: &AppContext,
    raw_dirs: &[PathBuf],
    output: &OutputPaths,
    test_frac_override: Option<f64>,
) -> Result<()> {
    let test_frac = test_frac_override.unwrap_or(app_context.settings.test_frac);

    let observations = load_raw_observations(raw_dirs)?;
    info!("Loaded {} raw observations", observations.len());

    let features = engineer_features(observations);
    for (symbol, count) in rows_per_symbol(&features) {
        info!("Engineered {} labeled rows for {}", count, symbol);
    }

    save_rows_to_file(&features, &output.processed_snapshot)?;
    info!(
        "Wrote processed snapshot with {} rows to {}",
        features.len(),
        output.processed_snapshot.display()
    );

    let outcome = chronological_split(features, test_frac);
    save_rows_to_file(&outcome.train, &output.train_snapshot)?;
    save_rows_to_file(&outcome.test, &output.test_snapshot)?;
    save_split_manifest(&outcome.manifest, &output.split_manifest)?;

    info!(
        "Split complete: train={} test={} symbols={} (test_frac={})",
        outcome.train.len(),
        outcome.test.len(),
        outcome.manifest.len(),
        test_frac
    );
    Ok(())
}

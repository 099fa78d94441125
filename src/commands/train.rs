use crate::context::AppContext;
use crate::feature_store::FEATURE_VIEW_NAME;
use crate::forest::{accuracy, f1_score, ForestHyperparams, ForestModel};
use crate::snapshot::load_rows_from_file;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_TRIALS: usize = 5;
pub const DEFAULT_SAMPLE_ROWS: usize = 5000;
pub const REGISTERED_MODEL_NAME: &str = "stock_rf_model";

/// Fraction of the sampled rows held out for trial evaluation.
const HOLDOUT_FRAC: f64 = 0.2;
/// Seed for the holdout shuffle, the search draws, and the tree bootstrap.
const BASE_SEED: u64 = 42;

#[derive(Serialize)]
struct TrainSummary {
    n_trees: u16,
    max_depth: u16,
    accuracy: f64,
    f1_score: f64,
    train_rows: usize,
    holdout_rows: usize,
    artifact: String,
}

struct TrialResult {
    model: ForestModel,
    accuracy: f64,
    f1: f64,
}

/// Random hyperparameter search over the feature snapshot. Every trial is
/// logged as a tracking run; the most accurate model is persisted and
/// registered.
pub async fn run(
    app_context: &AppContext,
    snapshot: &Path,
    model_output: &Path,
    trials: usize,
    sample_rows: usize,
) -> Result<()> {
    if trials == 0 {
        return Err(anyhow!("At least one search trial is required"));
    }

    // The registry must already know the stock view before a model trained
    // on its features is published.
    let store = app_context.feature_store()?;
    store
        .verify_feature_view(FEATURE_VIEW_NAME)
        .await
        .context("Feature store pre-flight check failed")?;

    let mut rows = load_rows_from_file(snapshot)?;
    info!(
        "Loaded {} feature rows from {}",
        rows.len(),
        snapshot.display()
    );

    // Most recent rows across all symbols, mirroring the sampling the
    // feature snapshot was built for.
    rows.sort_by_key(|row| row.timestamp);
    if rows.len() > sample_rows {
        rows.drain(..rows.len() - sample_rows);
    }

    let before_filter = rows.len();
    rows.retain(|row| row.has_finite_features());
    let dropped = before_filter - rows.len();
    if dropped > 0 {
        warn!("Dropped {} rows with incomplete features", dropped);
    }
    if rows.is_empty() {
        return Err(anyhow!(
            "No usable training rows in {}",
            snapshot.display()
        ));
    }

    let features: Vec<Vec<f64>> = rows.iter().map(|row| row.feature_vector().to_vec()).collect();
    let labels: Vec<u32> = rows.iter().map(|row| row.target_5min as u32).collect();

    let (train_idx, holdout_idx) = holdout_split(rows.len());
    let train_x = select(&features, &train_idx);
    let train_y = select(&labels, &train_idx);
    let holdout_x = select(&features, &holdout_idx);
    let holdout_y = select(&labels, &holdout_idx);
    info!(
        "Search set: train={} holdout={} trials={}",
        train_x.len(),
        holdout_x.len(),
        trials
    );

    let tracking = app_context.tracking().await?;
    let mut search_rng = StdRng::seed_from_u64(BASE_SEED);
    let mut best: Option<TrialResult> = None;

    for trial in 0..trials {
        let hyperparams = ForestHyperparams::sample(&mut search_rng);
        let model = ForestModel::fit(
            &train_x,
            &train_y,
            hyperparams,
            BASE_SEED + trial as u64,
        )
        .with_context(|| format!("trial {} failed to fit", trial))?;
        let predictions = model
            .predict(&holdout_x)
            .with_context(|| format!("trial {} failed to predict", trial))?;
        let trial_accuracy = accuracy(&holdout_y, &predictions);
        let trial_f1 = f1_score(&holdout_y, &predictions);

        let run = tracking.create_run(&format!("trial-{}", trial)).await?;
        tracking
            .log_batch(
                &run,
                &[
                    ("n_estimators", hyperparams.n_trees.to_string()),
                    ("max_depth", hyperparams.max_depth.to_string()),
                ],
                &[("accuracy", trial_accuracy), ("f1_score", trial_f1)],
            )
            .await?;
        tracking.end_run(&run).await?;

        info!(
            "Trial {}: n_trees={} max_depth={} accuracy={:.4} f1={:.4}",
            trial, hyperparams.n_trees, hyperparams.max_depth, trial_accuracy, trial_f1
        );

        let improves = best
            .as_ref()
            .map(|current| trial_accuracy > current.accuracy)
            .unwrap_or(true);
        if improves {
            best = Some(TrialResult {
                model,
                accuracy: trial_accuracy,
                f1: trial_f1,
            });
        }
    }

    let best = best.ok_or_else(|| anyhow!("Search produced no candidate model"))?;
    let hyperparams = best.model.hyperparams;
    info!(
        "Best trial: n_trees={} max_depth={} accuracy={:.4} f1={:.4}",
        hyperparams.n_trees, hyperparams.max_depth, best.accuracy, best.f1
    );

    best.model
        .save_to_file(model_output)
        .with_context(|| format!("Failed to persist model to {}", model_output.display()))?;

    // A final run carries the winning configuration and anchors the
    // registered model version.
    let best_run = tracking.create_run("best_model").await?;
    tracking
        .log_batch(
            &best_run,
            &[
                ("n_estimators", hyperparams.n_trees.to_string()),
                ("max_depth", hyperparams.max_depth.to_string()),
            ],
            &[("accuracy", best.accuracy), ("f1_score", best.f1)],
        )
        .await?;
    tracking
        .register_model(
            REGISTERED_MODEL_NAME,
            &model_output.display().to_string(),
            &best_run,
        )
        .await?;
    tracking.end_run(&best_run).await?;

    let summary = TrainSummary {
        n_trees: hyperparams.n_trees,
        max_depth: hyperparams.max_depth,
        accuracy: best.accuracy,
        f1_score: best.f1,
        train_rows: train_x.len(),
        holdout_rows: holdout_x.len(),
        artifact: model_output.display().to_string(),
    };
    let payload = serde_json::to_string(&summary).context("Failed to encode train summary")?;
    println!("STOCKPIPE_TRAIN_SUMMARY={}", payload);

    Ok(())
}

/// Seeded shuffle split of row indices. The holdout is at least one row and
/// never the whole set (given two or more rows).
fn holdout_split(n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(BASE_SEED);
    indices.shuffle(&mut rng);

    let mut holdout_rows = (n as f64 * HOLDOUT_FRAC).ceil() as usize;
    if holdout_rows >= n {
        holdout_rows = n.saturating_sub(1);
    }
    let train_rows = n - holdout_rows;
    let holdout = indices.split_off(train_rows);
    (indices, holdout)
}

fn select<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&idx| values[idx].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holdout_split_is_deterministic_and_disjoint() {
        let (train_a, holdout_a) = holdout_split(100);
        let (train_b, holdout_b) = holdout_split(100);
        assert_eq!(train_a, train_b);
        assert_eq!(holdout_a, holdout_b);
        assert_eq!(train_a.len(), 80);
        assert_eq!(holdout_a.len(), 20);

        let mut all: Vec<usize> = train_a.iter().chain(&holdout_a).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn holdout_never_consumes_everything() {
        let (train, holdout) = holdout_split(2);
        assert_eq!(train.len(), 1);
        assert_eq!(holdout.len(), 1);

        let (train, holdout) = holdout_split(1);
        assert_eq!(train.len(), 1);
        assert!(holdout.is_empty());
    }

    #[test]
    fn select_projects_by_index() {
        let values = vec![10, 20, 30, 40];
        assert_eq!(select(&values, &[3, 0]), vec![40, 10]);
    }
}

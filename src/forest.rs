use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

const MODEL_ARTIFACT_VERSION: u32 = 1;

/// Tree counts the search draws from, matching a 50..=150 step-10 grid.
const N_TREES_CHOICES: [u16; 11] = [50, 60, 70, 80, 90, 100, 110, 120, 130, 140, 150];
const MAX_DEPTH_RANGE: std::ops::RangeInclusive<u16> = 3..=10;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("model fit failed: {0}")]
    Fit(String),
    #[error("prediction failed: {0}")]
    Predict(String),
    #[error("model artifact version mismatch (found {found}, expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("model artifact io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model artifact encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// One hyperparameter draw for the random search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestHyperparams {
    pub n_trees: u16,
    pub max_depth: u16,
}

impl ForestHyperparams {
    /// Draws uniformly from the search space.
    pub fn sample(rng: &mut StdRng) -> Self {
        let n_trees = *N_TREES_CHOICES
            .choose(rng)
            .unwrap_or(&N_TREES_CHOICES[0]);
        let max_depth = rng.gen_range(MAX_DEPTH_RANGE);
        Self { n_trees, max_depth }
    }
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    version: u32,
    hyperparams: ForestHyperparams,
    classifier: RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>,
}

/// A fitted random-forest classifier together with the hyperparameters
/// that produced it.
#[derive(Debug)]
pub struct ForestModel {
    pub hyperparams: ForestHyperparams,
    classifier: RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>,
}

impl ForestModel {
    /// Fits on row-major feature vectors with binary labels. The seed pins
    /// the bootstrap sampling so repeated fits are reproducible.
    pub fn fit(
        features: &[Vec<f64>],
        labels: &[u32],
        hyperparams: ForestHyperparams,
        seed: u64,
    ) -> Result<Self, ModelError> {
        if features.is_empty() || labels.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let x = DenseMatrix::from_2d_vec(&features.to_vec());
        let y = labels.to_vec();
        let params = RandomForestClassifierParameters::default()
            .with_n_trees(hyperparams.n_trees)
            .with_max_depth(hyperparams.max_depth)
            .with_seed(seed);
        let classifier = RandomForestClassifier::fit(&x, &y, params)
            .map_err(|err| ModelError::Fit(err.to_string()))?;
        Ok(Self {
            hyperparams,
            classifier,
        })
    }

    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<u32>, ModelError> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let x = DenseMatrix::from_2d_vec(&features.to_vec());
        self.classifier
            .predict(&x)
            .map_err(|err| ModelError::Predict(err.to_string()))
    }

    pub fn save_to_file<P: AsRef<Path>>(self, path: P) -> Result<(), ModelError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let artifact = ModelArtifact {
            version: MODEL_ARTIFACT_VERSION,
            hyperparams: self.hyperparams,
            classifier: self.classifier,
        };
        bincode::serialize_into(&mut writer, &artifact)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let artifact: ModelArtifact = bincode::deserialize_from(reader)?;
        if artifact.version != MODEL_ARTIFACT_VERSION {
            return Err(ModelError::VersionMismatch {
                found: artifact.version,
                expected: MODEL_ARTIFACT_VERSION,
            });
        }
        Ok(Self {
            hyperparams: artifact.hyperparams,
            classifier: artifact.classifier,
        })
    }
}

/// Fraction of predictions matching the truth. Empty input scores 0.
pub fn accuracy(truth: &[u32], predicted: &[u32]) -> f64 {
    if truth.is_empty() || truth.len() != predicted.len() {
        return 0.0;
    }
    let hits = truth
        .iter()
        .zip(predicted)
        .filter(|(a, b)| a == b)
        .count();
    hits as f64 / truth.len() as f64
}

/// F1 for the positive class (label 1). Returns 0 when there are no
/// positive predictions and no positive truths to balance.
pub fn f1_score(truth: &[u32], predicted: &[u32]) -> f64 {
    if truth.is_empty() || truth.len() != predicted.len() {
        return 0.0;
    }
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (t, p) in truth.iter().zip(predicted) {
        match (*t, *p) {
            (1, 1) => tp += 1,
            (0, 1) => fp += 1,
            (1, 0) => fn_ += 1,
            _ => {}
        }
    }
    let denominator = 2 * tp + fp + fn_;
    if denominator == 0 {
        return 0.0;
    }
    (2 * tp) as f64 / denominator as f64
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw row of per-symbol market data after column normalization and
/// numeric coercion. An unparseable close is kept as `None`; an unparseable
/// or absent volume is zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub close: Option<f64>,
    pub volume: f64,
}

/// A labeled observation with its rolling-window features. Rows only exist
/// where the 5-step-ahead label is defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub close: Option<f64>,
    pub volume: f64,
    /// Mean close over the trailing 10 observations of this symbol,
    /// `None` when every close in the window is missing.
    pub rolling_avg_10: Option<f64>,
    /// Volume sum over the same trailing window.
    pub volume_sum_10: f64,
    /// 1 iff the close 5 observations ahead exceeds this row's close.
    pub target_5min: u8,
}

impl FeatureRow {
    /// The model's feature vector, in training column order.
    pub fn feature_vector(&self) -> [f64; 2] {
        [self.rolling_avg_10.unwrap_or(f64::NAN), self.volume_sum_10]
    }

    pub fn has_finite_features(&self) -> bool {
        self.feature_vector().iter().all(|value| value.is_finite())
    }
}

/// Per-symbol audit record of the chronological train/test split. Field
/// names are the published manifest contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolSplit {
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_start: Option<String>,
    pub train_end: Option<String>,
    pub test_start: Option<String>,
    pub test_end: Option<String>,
}

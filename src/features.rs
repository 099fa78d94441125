use crate::models::{FeatureRow, Observation};
use rayon::prelude::*;
use std::collections::HashMap;

/// Trailing window length for the rolling statistics.
pub const ROLLING_WINDOW: usize = 10;
/// How many observations ahead the label looks.
pub const LABEL_LOOKAHEAD: usize = 5;

/// Sorts the raw table by (symbol, timestamp) and computes rolling features
/// and labels per symbol. Symbols are independent, so they run in parallel.
pub fn engineer_features(mut observations: Vec<Observation>) -> Vec<FeatureRow> {
    observations.sort_by(|a, b| {
        a.symbol
            .cmp(&b.symbol)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    let mut by_symbol: Vec<(String, Vec<Observation>)> = Vec::new();
    for observation in observations {
        match by_symbol.last_mut() {
            Some((symbol, group)) if *symbol == observation.symbol => group.push(observation),
            _ => by_symbol.push((observation.symbol.clone(), vec![observation])),
        }
    }

    by_symbol
        .par_iter()
        .map(|(_, group)| compute_symbol_features(group))
        .reduce(Vec::new, |mut acc, mut rows| {
            acc.append(&mut rows);
            acc
        })
}

/// Pure per-symbol transform over chronologically ordered observations.
///
/// Windows require at least one observation, so the first rows of a series
/// average over however much history exists. Rows whose 5-ahead lookahead
/// falls off the end of the series are dropped; a missing close on either
/// side of the comparison labels the row 0.
pub fn compute_symbol_features(rows: &[Observation]) -> Vec<FeatureRow> {
    let n = rows.len();
    if n <= LABEL_LOOKAHEAD {
        return Vec::new();
    }

    let mut output = Vec::with_capacity(n - LABEL_LOOKAHEAD);
    for idx in 0..(n - LABEL_LOOKAHEAD) {
        let window_start = idx.saturating_sub(ROLLING_WINDOW - 1);
        let window = &rows[window_start..=idx];

        let mut close_sum = 0.0;
        let mut close_count = 0usize;
        let mut volume_sum = 0.0;
        for observation in window {
            if let Some(close) = observation.close {
                close_sum += close;
                close_count += 1;
            }
            volume_sum += observation.volume;
        }
        let rolling_avg = (close_count > 0).then(|| close_sum / close_count as f64);

        let target = match (rows[idx].close, rows[idx + LABEL_LOOKAHEAD].close) {
            (Some(now), Some(ahead)) if ahead > now => 1,
            _ => 0,
        };

        output.push(FeatureRow {
            symbol: rows[idx].symbol.clone(),
            timestamp: rows[idx].timestamp,
            close: rows[idx].close,
            volume: rows[idx].volume,
            rolling_avg_10: rolling_avg,
            volume_sum_10: volume_sum,
            target_5min: target,
        });
    }
    output
}

/// Row counts per symbol, mostly for logging.
pub fn rows_per_symbol(rows: &[FeatureRow]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for row in rows {
        *counts.entry(row.symbol.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(symbol: &str, closes: &[f64]) -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(idx, close)| Observation {
                symbol: symbol.to_string(),
                timestamp: start + Duration::minutes(idx as i64),
                close: Some(*close),
                volume: (idx + 1) as f64,
            })
            .collect()
    }

    #[test]
    fn first_row_rolls_over_itself() {
        let rows = series("ACME", &[3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let features = compute_symbol_features(&rows);
        assert_eq!(features[0].rolling_avg_10, Some(3.0));
        assert_eq!(features[0].volume_sum_10, 1.0);
    }

    #[test]
    fn short_series_uses_available_history() {
        let rows = series("ACME", &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0]);
        let features = compute_symbol_features(&rows);
        // Second labeled row averages the first two closes.
        assert_eq!(features[1].rolling_avg_10, Some(3.0));
        assert_eq!(features[1].volume_sum_10, 3.0);
    }

    #[test]
    fn label_counts_and_values() {
        let closes: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let rows = series("ACME", &closes);
        let features = compute_symbol_features(&rows);
        assert_eq!(features.len(), 12 - LABEL_LOOKAHEAD);
        // Strictly increasing closes label every remaining row 1.
        assert!(features.iter().all(|row| row.target_5min == 1));

        let falling: Vec<f64> = (0..12).map(|i| -(i as f64)).collect();
        let features = compute_symbol_features(&series("ACME", &falling));
        assert!(features.iter().all(|row| row.target_5min == 0));
    }

    #[test]
    fn five_or_fewer_rows_yield_nothing() {
        let rows = series("ACME", &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(compute_symbol_features(&rows).is_empty());
    }

    #[test]
    fn missing_close_labels_zero_and_skips_average() {
        let mut rows = series("ACME", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        rows[0].close = None;
        let features = compute_symbol_features(&rows);
        // Row 0 compares None against close[5] and labels 0; its window has
        // no non-missing close, so the average is absent.
        assert_eq!(features[0].target_5min, 0);
        assert_eq!(features[0].rolling_avg_10, None);
        // Row 1's window holds [None, 2.0] and averages the present value.
        assert_eq!(features[1].rolling_avg_10, Some(2.0));
    }

    #[test]
    fn windows_never_cross_symbols() {
        let mut observations = series("AAA", &[100.0; 8]);
        observations.extend(series("BBB", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));
        let features = engineer_features(observations);

        let bbb_first = features
            .iter()
            .find(|row| row.symbol == "BBB")
            .expect("BBB rows present");
        // If the window leaked across symbols this would include the 100s.
        assert_eq!(bbb_first.rolling_avg_10, Some(1.0));
    }

    #[test]
    fn engineer_features_is_deterministic() {
        let mut observations = series("BBB", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        observations.extend(series("AAA", &[7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0]));
        let first = engineer_features(observations.clone());
        let second = engineer_features(observations);
        let encode = |rows: &[FeatureRow]| bincode::serialize(rows).unwrap();
        assert_eq!(encode(&first), encode(&second));
        // Output is grouped by symbol in sorted order.
        assert_eq!(first[0].symbol, "AAA");
    }
}

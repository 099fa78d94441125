use crate::models::{FeatureRow, SymbolSplit};
use std::collections::BTreeMap;

/// The two halves of the chronological split plus the per-symbol manifest.
pub struct SplitOutcome {
    pub train: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
    pub manifest: BTreeMap<String, SymbolSplit>,
}

/// Splits each symbol independently: the last `round(test_frac * n)` rows
/// by timestamp become test, the remainder train. Rounding is half away
/// from zero (`f64::round`), so an exact half like `n = 10, frac = 0.25`
/// puts 3 rows in test. The split point is purely count-based, so symbols
/// with different date ranges get independently sized test windows. Output
/// preserves chronological order within each symbol; symbols are
/// concatenated in sorted-name order.
pub fn chronological_split(rows: Vec<FeatureRow>, test_frac: f64) -> SplitOutcome {
    let mut by_symbol: BTreeMap<String, Vec<FeatureRow>> = BTreeMap::new();
    for row in rows {
        by_symbol.entry(row.symbol.clone()).or_default().push(row);
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    let mut manifest = BTreeMap::new();

    for (symbol, mut group) in by_symbol {
        group.sort_by_key(|row| row.timestamp);
        let n = group.len();
        let test_rows = ((test_frac * n as f64).round() as usize).min(n);
        let train_rows = n - test_rows;

        let test_part = group.split_off(train_rows);
        let train_part = group;

        manifest.insert(
            symbol,
            SymbolSplit {
                train_rows: train_part.len(),
                test_rows: test_part.len(),
                train_start: bound(&train_part, false),
                train_end: bound(&train_part, true),
                test_start: bound(&test_part, false),
                test_end: bound(&test_part, true),
            },
        );

        train.extend(train_part);
        test.extend(test_part);
    }

    SplitOutcome {
        train,
        test,
        manifest,
    }
}

fn bound(rows: &[FeatureRow], last: bool) -> Option<String> {
    let row = if last { rows.last() } else { rows.first() };
    row.map(|row| row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn rows(symbol: &str, n: usize) -> Vec<FeatureRow> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        (0..n)
            .map(|idx| FeatureRow {
                symbol: symbol.to_string(),
                timestamp: start + Duration::minutes(idx as i64),
                close: Some(idx as f64),
                volume: 1.0,
                rolling_avg_10: Some(idx as f64),
                volume_sum_10: 1.0,
                target_5min: 0,
            })
            .collect()
    }

    #[test]
    fn counts_add_up_and_test_matches_round() {
        for (n, frac, expected_test) in [(7usize, 0.2, 1usize), (10, 0.2, 2), (10, 0.25, 3), (3, 0.5, 2)] {
            let outcome = chronological_split(rows("ACME", n), frac);
            let split = &outcome.manifest["ACME"];
            assert_eq!(split.test_rows, expected_test, "n={} frac={}", n, frac);
            assert_eq!(split.train_rows + split.test_rows, n);
            assert_eq!(outcome.train.len(), split.train_rows);
            assert_eq!(outcome.test.len(), split.test_rows);
        }
    }

    #[test]
    fn zero_and_full_fractions() {
        let outcome = chronological_split(rows("ACME", 9), 0.0);
        assert_eq!(outcome.manifest["ACME"].test_rows, 0);
        assert!(outcome.test.is_empty());
        assert_eq!(outcome.manifest["ACME"].test_start, None);

        let outcome = chronological_split(rows("ACME", 9), 1.0);
        assert_eq!(outcome.manifest["ACME"].train_rows, 0);
        assert!(outcome.train.is_empty());
    }

    #[test]
    fn test_half_is_strictly_later_per_symbol() {
        let mut all = rows("AAA", 13);
        all.extend(rows("BBB", 29));
        let outcome = chronological_split(all, 0.3);

        for symbol in ["AAA", "BBB"] {
            let train_max = outcome
                .train
                .iter()
                .filter(|row| row.symbol == symbol)
                .map(|row| row.timestamp)
                .max()
                .unwrap();
            let test_min = outcome
                .test
                .iter()
                .filter(|row| row.symbol == symbol)
                .map(|row| row.timestamp)
                .min()
                .unwrap();
            assert!(test_min >= train_max, "test precedes train for {}", symbol);
        }
    }

    #[test]
    fn symbols_split_independently() {
        let mut all = rows("AAA", 10);
        all.extend(rows("BBB", 4));
        let outcome = chronological_split(all, 0.25);
        assert_eq!(outcome.manifest["AAA"].test_rows, 3);
        assert_eq!(outcome.manifest["BBB"].test_rows, 1);
        assert_eq!(outcome.manifest.len(), 2);
    }

    #[test]
    fn manifest_records_timestamp_bounds() {
        let outcome = chronological_split(rows("ACME", 10), 0.2);
        let split = &outcome.manifest["ACME"];
        assert_eq!(split.train_start.as_deref(), Some("2024-01-02 09:30:00"));
        assert_eq!(split.train_end.as_deref(), Some("2024-01-02 09:37:00"));
        assert_eq!(split.test_start.as_deref(), Some("2024-01-02 09:38:00"));
        assert_eq!(split.test_end.as_deref(), Some("2024-01-02 09:39:00"));
    }
}

use crate::models::{FeatureRow, SymbolSplit};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const FEATURE_SNAPSHOT_VERSION: u32 = 1;

/// On-disk columnar snapshot of a feature table. Snapshots are regenerated
/// wholesale on every run; there is no incremental update path. The header
/// carries only data-derived fields, so identical inputs serialize to
/// byte-identical files.
#[derive(Serialize, Deserialize)]
struct FeatureSnapshot {
    version: u32,
    /// Newest row timestamp, or the epoch for an empty table.
    latest_timestamp: DateTime<Utc>,
    rows: Vec<FeatureRow>,
}

pub fn save_rows_to_file<P: AsRef<Path>>(rows: &[FeatureRow], path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create snapshot directory {}", parent.display())
            })?;
        }
    }

    let file = File::create(path)
        .with_context(|| format!("Unable to create feature snapshot at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let snapshot = FeatureSnapshot {
        version: FEATURE_SNAPSHOT_VERSION,
        latest_timestamp: rows
            .iter()
            .map(|row| row.timestamp)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        rows: rows.to_vec(),
    };
    bincode::serialize_into(&mut writer, &snapshot)
        .context("Failed to serialize feature snapshot")?;
    writer
        .flush()
        .context("Failed to flush feature snapshot to disk")?;
    Ok(())
}

pub fn load_rows_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<FeatureRow>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open feature snapshot at {}", path.display()))?;
    let reader = BufReader::new(file);
    let snapshot: FeatureSnapshot =
        bincode::deserialize_from(reader).context("Snapshot decode failed")?;

    if snapshot.version != FEATURE_SNAPSHOT_VERSION {
        return Err(anyhow!(
            "Feature snapshot version mismatch (found {}, expected {})",
            snapshot.version,
            FEATURE_SNAPSHOT_VERSION
        ));
    }

    Ok(snapshot.rows)
}

/// Writes the split manifest as a pretty-printed JSON object keyed by
/// symbol.
pub fn save_split_manifest<P: AsRef<Path>>(
    manifest: &BTreeMap<String, SymbolSplit>,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create manifest directory {}", parent.display())
            })?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Unable to create split manifest at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, manifest)
        .context("Failed to serialize split manifest")?;
    writer
        .flush()
        .context("Failed to flush split manifest to disk")?;
    Ok(())
}

pub fn load_split_manifest<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, SymbolSplit>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open split manifest at {}", path.display()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).context("Split manifest decode failed")
}

/// Min/max timestamps of a feature table, used as the materialization range.
pub fn timestamp_bounds(rows: &[FeatureRow]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let min = rows.iter().map(|row| row.timestamp).min()?;
    let max = rows.iter().map(|row| row.timestamp).max()?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_rows() -> Vec<FeatureRow> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        (0..4)
            .map(|idx| FeatureRow {
                symbol: "ACME".to_string(),
                timestamp: start + chrono::Duration::minutes(idx),
                close: Some(idx as f64),
                volume: 1.0,
                rolling_avg_10: Some(idx as f64),
                volume_sum_10: 1.0,
                target_5min: (idx % 2) as u8,
            })
            .collect()
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/stock_data.bin");
        let rows = sample_rows();
        save_rows_to_file(&rows, &path).unwrap();
        let loaded = load_rows_from_file(&path).unwrap();
        assert_eq!(loaded.len(), rows.len());
        assert_eq!(loaded[3].target_5min, 1);
        assert_eq!(loaded[0].timestamp, rows[0].timestamp);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock_data.bin");
        let snapshot = FeatureSnapshot {
            version: FEATURE_SNAPSHOT_VERSION + 1,
            latest_timestamp: Utc::now(),
            rows: sample_rows(),
        };
        let file = File::create(&path).unwrap();
        bincode::serialize_into(BufWriter::new(file), &snapshot).unwrap();

        let err = load_rows_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn identical_rows_serialize_byte_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        let rows = sample_rows();
        save_rows_to_file(&rows, &path_a).unwrap();
        save_rows_to_file(&rows, &path_b).unwrap();
        assert_eq!(fs::read(&path_a).unwrap(), fs::read(&path_b).unwrap());
    }

    #[test]
    fn manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.json");
        let mut manifest = BTreeMap::new();
        manifest.insert(
            "ACME".to_string(),
            SymbolSplit {
                train_rows: 6,
                test_rows: 1,
                train_start: Some("2024-01-02 09:30:00".to_string()),
                train_end: Some("2024-01-02 09:35:00".to_string()),
                test_start: Some("2024-01-02 09:36:00".to_string()),
                test_end: Some("2024-01-02 09:36:00".to_string()),
            },
        );
        save_split_manifest(&manifest, &path).unwrap();
        let loaded = load_split_manifest(&path).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn bounds_cover_the_table() {
        let rows = sample_rows();
        let (start, end) = timestamp_bounds(&rows).unwrap();
        assert_eq!(start, rows[0].timestamp);
        assert_eq!(end, rows[3].timestamp);
        assert!(timestamp_bounds(&[]).is_none());
    }
}

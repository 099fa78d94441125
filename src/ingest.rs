use crate::models::Observation;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Reads every `*.csv` file under the given directories and concatenates the
/// rows into one unordered table. Fails hard when no input file matches.
pub fn load_raw_observations(raw_dirs: &[PathBuf]) -> Result<Vec<Observation>> {
    let files = collect_csv_files(raw_dirs)?;
    if files.is_empty() {
        return Err(anyhow!(
            "No CSV files found under {}",
            describe_dirs(raw_dirs)
        ));
    }

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message("Loading raw data");

    let mut observations = Vec::new();
    for file in &files {
        let rows = load_csv_file(file)?;
        info!("Loaded {} rows={}", file.display(), rows.len());
        observations.extend(rows);
        progress.inc(1);
    }
    progress.finish_with_message("Raw data loaded");

    Ok(observations)
}

/// The symbol identifier is the file stem text before the first `__`, or
/// the whole stem when no separator is present.
pub fn symbol_from_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.split_once("__") {
        Some((symbol, _)) => symbol.to_string(),
        None => stem,
    }
}

fn collect_csv_files(raw_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in raw_dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            // A missing directory contributes zero files, same as an
            // empty one; the zero-total check reports the failure.
            Err(_) => continue,
        };
        let mut dir_files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .map(|ext| ext.eq_ignore_ascii_case("csv"))
                        .unwrap_or(false)
            })
            .collect();
        dir_files.sort();
        files.extend(dir_files);
    }
    Ok(files)
}

fn describe_dirs(raw_dirs: &[PathBuf]) -> String {
    let parts: Vec<String> = raw_dirs
        .iter()
        .map(|dir| dir.display().to_string())
        .collect();
    parts.join(", ")
}

fn load_csv_file(path: &Path) -> Result<Vec<Observation>> {
    let symbol = symbol_from_filename(path);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open raw CSV {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header row of {}", path.display()))?
        .iter()
        .map(|name| name.trim().to_lowercase())
        .collect();

    let timestamp_idx = column_index(&headers, "timestamp")
        .ok_or_else(|| anyhow!("{} is missing a `timestamp` column", path.display()))?;
    let close_idx = column_index(&headers, "close")
        .ok_or_else(|| anyhow!("{} is missing a `close` column", path.display()))?;
    let volume_idx = column_index(&headers, "volume");

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("Failed to read {} row {}", path.display(), line + 2))?;

        let raw_timestamp = record.get(timestamp_idx).unwrap_or("").trim();
        let timestamp = parse_timestamp(raw_timestamp).with_context(|| {
            format!(
                "Invalid timestamp `{}` in {} row {}",
                raw_timestamp,
                path.display(),
                line + 2
            )
        })?;

        // Coercion failures become missing values, never hard errors.
        let close = record
            .get(close_idx)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|value| value.parse::<f64>().ok());
        let volume = volume_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.0);

        rows.push(Observation {
            symbol: symbol.clone(),
            timestamp,
            close,
            volume,
        });
    }

    Ok(rows)
}

fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (with optional fraction), and
/// bare dates at midnight.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(anyhow!("Unsupported timestamp format: {}", raw))
}

use crate::context::AppContext;
use crate::snapshot::{load_rows_from_file, timestamp_bounds};
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

/// Pushes the feature values covering the snapshot's full time range into
/// the store's online-serving layer.
pub async fn run(app_context: &AppContext, processed_snapshot: &Path) -> Result<()> {
    let rows = load_rows_from_file(processed_snapshot)?;
    let (start, end) = timestamp_bounds(&rows).ok_or_else(|| {
        anyhow!(
            "Snapshot {} holds no rows to materialize",
            processed_snapshot.display()
        )
    })?;

    info!(
        "Materializing {} rows covering {} through {}",
        rows.len(),
        start,
        end
    );
    let store = app_context.feature_store()?;
    store.materialize(start, end).await?;
    info!("Materialization triggered");
    Ok(())
}

use crate::context::AppContext;
use crate::feature_store::FeatureView;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Registers the stock feature view with the feature store, pointing its
/// offline source at the processed snapshot.
pub async fn run(app_context: &AppContext, processed_snapshot: &Path) -> Result<()> {
    let view = FeatureView::stock_minute_features(processed_snapshot);
    let store = app_context.feature_store()?;
    store.apply(&view).await?;
    info!(
        "Registered feature view `{}` with source {}",
        view.name,
        processed_snapshot.display()
    );
    Ok(())
}

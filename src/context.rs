use crate::config::PipelineSettings;
use crate::feature_store::FeatureStoreClient;
use crate::tracking::MlflowClient;
use anyhow::Result;

/// Shared state handed to every subcommand. Service clients are built
/// lazily so offline commands never open a connection.
pub struct AppContext {
    pub settings: PipelineSettings,
}

impl AppContext {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    pub fn feature_store(&self) -> Result<FeatureStoreClient> {
        FeatureStoreClient::new(&self.settings.feature_store_uri)
    }

    pub async fn tracking(&self) -> Result<MlflowClient> {
        MlflowClient::for_experiment(
            &self.settings.tracking_uri,
            &self.settings.experiment_name,
        )
        .await
    }
}

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_PREFIX: &str = "api/2.0/mlflow";

#[derive(Serialize)]
struct ParamEntry {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct MetricEntry {
    key: String,
    value: f64,
    timestamp: i64,
    step: i64,
}

#[derive(Deserialize)]
struct ExperimentBody {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentBody,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunInfoBody {
    run_id: String,
}

#[derive(Deserialize)]
struct RunBody {
    info: RunInfoBody,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunBody,
}

/// A run open on the tracking server. Metrics and parameters are logged
/// against it until `end_run` closes it.
#[derive(Debug, Clone)]
pub struct TrackingRun {
    pub run_id: String,
}

/// Client for an MLflow-compatible tracking/model-registry service. The
/// client lives only for the training run that created it; configuration
/// comes in explicitly rather than from process-global state.
pub struct MlflowClient {
    base_url: String,
    client: reqwest::Client,
    experiment_id: String,
}

impl MlflowClient {
    /// Connects and resolves (or creates) the named experiment.
    pub async fn for_experiment(tracking_uri: &str, experiment_name: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build tracking HTTP client")?;
        let base_url = tracking_uri.trim_end_matches('/').to_string();

        let experiment_id =
            Self::resolve_experiment_id(&client, &base_url, experiment_name).await?;
        info!(
            "Tracking experiment `{}` resolved to id {}",
            experiment_name, experiment_id
        );

        Ok(Self {
            base_url,
            client,
            experiment_id,
        })
    }

    async fn resolve_experiment_id(
        client: &reqwest::Client,
        base_url: &str,
        name: &str,
    ) -> Result<String> {
        let url = format!("{}/{}/experiments/get-by-name", base_url, API_PREFIX);
        let response = client
            .get(&url)
            .query(&[("experiment_name", name)])
            .send()
            .await
            .with_context(|| format!("experiment lookup request to {} failed", url))?;

        if response.status().is_success() {
            let body: GetExperimentResponse = response
                .json()
                .await
                .context("experiment lookup returned an unreadable body")?;
            return Ok(body.experiment.experiment_id);
        }

        let create_url = format!("{}/{}/experiments/create", base_url, API_PREFIX);
        let response = client
            .post(&create_url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .with_context(|| format!("experiment create request to {} failed", create_url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Experiment create failed: status={} url={} body={}",
                status,
                create_url,
                body
            ));
        }
        let body: CreateExperimentResponse = response
            .json()
            .await
            .context("experiment create returned an unreadable body")?;
        Ok(body.experiment_id)
    }

    pub async fn create_run(&self, run_name: &str) -> Result<TrackingRun> {
        let url = format!("{}/{}/runs/create", self.base_url, API_PREFIX);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "experiment_id": self.experiment_id,
                "run_name": run_name,
                "start_time": Utc::now().timestamp_millis(),
            }))
            .send()
            .await
            .with_context(|| format!("run create request to {} failed", url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Run create failed: status={} url={} body={}",
                status,
                url,
                body
            ));
        }
        let body: CreateRunResponse = response
            .json()
            .await
            .context("run create returned an unreadable body")?;
        Ok(TrackingRun {
            run_id: body.run.info.run_id,
        })
    }

    /// Logs hyperparameters and metrics against a run in one batch call.
    pub async fn log_batch(
        &self,
        run: &TrackingRun,
        params: &[(&str, String)],
        metrics: &[(&str, f64)],
    ) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        let params: Vec<ParamEntry> = params
            .iter()
            .map(|(key, value)| ParamEntry {
                key: (*key).to_string(),
                value: value.clone(),
            })
            .collect();
        let metrics: Vec<MetricEntry> = metrics
            .iter()
            .map(|(key, value)| MetricEntry {
                key: (*key).to_string(),
                value: *value,
                timestamp,
                step: 0,
            })
            .collect();

        let url = format!("{}/{}/runs/log-batch", self.base_url, API_PREFIX);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "run_id": run.run_id,
                "params": params,
                "metrics": metrics,
            }))
            .send()
            .await
            .with_context(|| format!("log-batch request to {} failed", url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Metric logging failed: status={} url={} run_id={} body={}",
                status,
                url,
                run.run_id,
                body
            ));
        }
        Ok(())
    }

    pub async fn end_run(&self, run: &TrackingRun) -> Result<()> {
        let url = format!("{}/{}/runs/update", self.base_url, API_PREFIX);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "run_id": run.run_id,
                "status": "FINISHED",
                "end_time": Utc::now().timestamp_millis(),
            }))
            .send()
            .await
            .with_context(|| format!("run update request to {} failed", url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Run close failed: status={} url={} run_id={} body={}",
                status,
                url,
                run.run_id,
                body
            ));
        }
        Ok(())
    }

    /// Registers the model name (idempotent) and creates a version pointing
    /// at the persisted artifact for the given run.
    pub async fn register_model(
        &self,
        name: &str,
        artifact_source: &str,
        run: &TrackingRun,
    ) -> Result<()> {
        let create_url = format!("{}/{}/registered-models/create", self.base_url, API_PREFIX);
        let response = self
            .client
            .post(&create_url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .with_context(|| format!("model registration request to {} failed", create_url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // Re-registering an existing name is the normal steady state.
            if body.contains("RESOURCE_ALREADY_EXISTS") {
                warn!("Registered model `{}` already exists; adding a version", name);
            } else {
                return Err(anyhow!(
                    "Model registration failed: status={} url={} body={}",
                    status,
                    create_url,
                    body
                ));
            }
        }

        let version_url = format!("{}/{}/model-versions/create", self.base_url, API_PREFIX);
        let response = self
            .client
            .post(&version_url)
            .json(&serde_json::json!({
                "name": name,
                "source": artifact_source,
                "run_id": run.run_id,
            }))
            .send()
            .await
            .with_context(|| format!("model version request to {} failed", version_url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Model version create failed: status={} url={} body={}",
                status,
                version_url,
                body
            ));
        }
        info!("Registered model `{}` from {}", name, artifact_source);
        Ok(())
    }
}

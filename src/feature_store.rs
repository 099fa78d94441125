use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const FEATURE_VIEW_NAME: &str = "stock_minute_features";
const FEATURE_TTL_DAYS: u32 = 365;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The unique key features are indexed by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub description: String,
}

/// One feature column in a view's schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub dtype: String,
}

/// Pointer to the offline file the feature values come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSource {
    pub name: String,
    pub path: String,
    pub timestamp_field: String,
    pub file_format: String,
}

/// Declarative feature-view schema handed to the external feature store.
/// The store owns ingestion, versioning, and online serving; this side
/// never inspects what it does with the declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureView {
    pub name: String,
    pub entities: Vec<Entity>,
    pub ttl_days: u32,
    pub schema: Vec<Field>,
    pub online: bool,
    pub source: FileSource,
}

impl FeatureView {
    /// The pipeline's single view: two rolling features keyed by symbol,
    /// sourced from the processed snapshot, retained for one year.
    pub fn stock_minute_features(processed_snapshot: &Path) -> Self {
        Self {
            name: FEATURE_VIEW_NAME.to_string(),
            entities: vec![Entity {
                name: "stock_name".to_string(),
                description: "Unique stock identifier".to_string(),
            }],
            ttl_days: FEATURE_TTL_DAYS,
            schema: vec![
                Field {
                    name: "rolling_avg_10".to_string(),
                    dtype: "Float32".to_string(),
                },
                Field {
                    name: "volume_sum_10".to_string(),
                    dtype: "Float32".to_string(),
                },
            ],
            online: true,
            source: FileSource {
                name: "stock_source".to_string(),
                path: processed_snapshot.display().to_string(),
                timestamp_field: "timestamp".to_string(),
                file_format: "bincode".to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct MaterializeRequest {
    feature_view: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoreAck {
    #[serde(default)]
    message: Option<String>,
}

/// Thin client for the feature-store registry/online-store service. No
/// retries: registration and materialization failures abort the run.
pub struct FeatureStoreClient {
    base_url: String,
    client: reqwest::Client,
}

impl FeatureStoreClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build feature-store HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Registers (or re-registers) the feature view schema.
    pub async fn apply(&self, view: &FeatureView) -> Result<()> {
        let url = format!("{}/api/v1/feature-views", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(view)
            .send()
            .await
            .with_context(|| format!("feature view registration request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Feature view registration failed: status={} url={} body={}",
                status,
                url,
                body
            ));
        }

        let ack: StoreAck = response
            .json()
            .await
            .context("feature view registration returned an unreadable body")?;
        if let Some(message) = ack.message {
            log::info!("Feature store: {}", message);
        }
        Ok(())
    }

    /// Confirms the named view is registered. Used as a pre-flight before
    /// training so a model is never published against an unknown schema.
    pub async fn verify_feature_view(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/v1/feature-views/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("feature view lookup request to {} failed", url))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!(
                "Feature view `{}` is not registered: status={} url={}",
                name,
                status,
                url
            ));
        }
        Ok(())
    }

    /// Asks the store to copy feature values for the given time range into
    /// its online-serving representation.
    pub async fn materialize(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if start > end {
            return Err(anyhow!(
                "Materialization range start {} is after end {}",
                start,
                end
            ));
        }
        let url = format!("{}/api/v1/materialize", self.base_url);
        let request = MaterializeRequest {
            feature_view: FEATURE_VIEW_NAME.to_string(),
            start_date: start,
            end_date: end,
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("materialization request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Materialization failed: status={} url={} body={}",
                status,
                url,
                body
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn stock_view_declares_the_published_schema() {
        let view = FeatureView::stock_minute_features(&PathBuf::from("data/processed/stock_data.bin"));
        assert_eq!(view.name, "stock_minute_features");
        assert_eq!(view.ttl_days, 365);
        assert_eq!(view.entities.len(), 1);
        assert_eq!(view.entities[0].name, "stock_name");
        let names: Vec<&str> = view.schema.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(names, ["rolling_avg_10", "volume_sum_10"]);
        assert!(view.schema.iter().all(|field| field.dtype == "Float32"));
        assert_eq!(view.source.timestamp_field, "timestamp");
        assert!(view.online);
    }

    #[tokio::test]
    async fn verify_feature_view_checks_the_registry() {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            for status in ["200 OK", "404 Not Found"] {
                let (mut socket, _) = listener.accept().unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf);
                let body = "{}";
                write!(
                    socket,
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                )
                .unwrap();
            }
        });

        let client = FeatureStoreClient::new(&format!("http://{}", addr)).unwrap();
        client.verify_feature_view(FEATURE_VIEW_NAME).await.unwrap();
        let err = client
            .verify_feature_view(FEATURE_VIEW_NAME)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
        server.join().unwrap();
    }

    #[test]
    fn view_serializes_with_contract_field_names() {
        let view = FeatureView::stock_minute_features(&PathBuf::from("x.bin"));
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("ttl_days").is_some());
        assert!(json.get("source").and_then(|s| s.get("timestamp_field")).is_some());
    }
}

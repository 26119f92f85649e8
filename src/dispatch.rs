//! Hand-off of deployment jobs to the deployments service

use crate::config::DeployServiceSettings;
use crate::error::{FleetError, Result};
use crate::model::Server;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// A queued deployment as the deployments service expects it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    pub application_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `deploy` or `redeploy`
    #[serde(rename = "type")]
    pub kind: String,
    pub application_type: String,
    pub server_id: String,
}

impl DeploymentJob {
    pub fn deploy(application_id: &str, title: &str, server_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            kind: "deploy".to_string(),
            application_type: "application".to_string(),
            server_id: server_id.to_string(),
        }
    }
}

/// Client for the deployments service
pub struct DeployClient {
    client: reqwest::Client,
    settings: DeployServiceSettings,
}

impl DeployClient {
    pub fn new(settings: DeployServiceSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self) -> Result<(&str, &str)> {
        let url = self.settings.url.as_deref().ok_or_else(|| {
            FleetError::Config(
                "Missing SERVER_URL. Set it to the deployments service base URL (e.g., http://localhost:4000) and ensure API_KEY matches that service."
                    .to_string(),
            )
        })?;
        let api_key = self.settings.api_key.as_deref().ok_or_else(|| {
            FleetError::Config("Missing API_KEY. Set it to the shared secret for the deployments service.".to_string())
        })?;
        Ok((url.trim_end_matches('/'), api_key))
    }

    /// Enqueue `job` for `server`. Inactive servers and missing settings are
    /// refused before any request is made.
    pub async fn enqueue(&self, server: &Server, job: &DeploymentJob) -> Result<Value> {
        if !server.is_active() {
            return Err(FleetError::ServerInactive(server.name.clone()));
        }
        let (url, api_key) = self.endpoint()?;

        let response = self
            .client
            .post(format!("{}/deploy", url))
            .header("X-API-Key", api_key)
            .json(job)
            .send()
            .await
            .map_err(|e| {
                FleetError::Dispatch(format!(
                    "Failed to enqueue deployment via {}. Ensure the deployments service is running and reachable.\nOriginal error: {}",
                    url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FleetError::Dispatch(format!(
                "Deployment service at {} responded with {}. Body: {}",
                url, status, body
            )));
        }

        info!("Enqueued deployment of {} on {}", job.application_id, server.name);
        Ok(response.json().await?)
    }
}

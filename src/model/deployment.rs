//! Deployment records

use crate::error::{FleetError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Done,
    Error,
}

/// One provisioning attempt against a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub server_id: String,
    pub title: String,
    pub description: String,
    pub status: DeploymentStatus,
    /// Append-only log text
    pub log: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(server_id: &str, title: &str, description: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            server_id: server_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: DeploymentStatus::Pending,
            log: String::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Create/update operations on deployment records
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn create(&self, server_id: &str, title: &str, description: &str) -> Result<Deployment>;

    async fn append_log(&self, deployment_id: &str, text: &str) -> Result<()>;

    /// Move a pending deployment to `done` or `error`. A deployment is
    /// finalized at most once.
    async fn finalize(&self, deployment_id: &str, status: DeploymentStatus) -> Result<Deployment>;

    async fn get(&self, deployment_id: &str) -> Result<Deployment>;
}

/// In-process deployment store
#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn create(&self, server_id: &str, title: &str, description: &str) -> Result<Deployment> {
        let deployment = Deployment::new(server_id, title, description);
        self.deployments
            .write()
            .await
            .insert(deployment.id.clone(), deployment.clone());
        Ok(deployment)
    }

    async fn append_log(&self, deployment_id: &str, text: &str) -> Result<()> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(deployment_id)
            .ok_or_else(|| FleetError::DeploymentNotFound(deployment_id.to_string()))?;
        deployment.log.push_str(text);
        Ok(())
    }

    async fn finalize(&self, deployment_id: &str, status: DeploymentStatus) -> Result<Deployment> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(deployment_id)
            .ok_or_else(|| FleetError::DeploymentNotFound(deployment_id.to_string()))?;

        if deployment.status != DeploymentStatus::Pending || status == DeploymentStatus::Pending {
            return Err(FleetError::DeploymentFinalized(deployment_id.to_string()));
        }

        deployment.status = status;
        deployment.finished_at = Some(Utc::now());
        Ok(deployment.clone())
    }

    async fn get(&self, deployment_id: &str) -> Result<Deployment> {
        self.deployments
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| FleetError::DeploymentNotFound(deployment_id.to_string()))
    }
}

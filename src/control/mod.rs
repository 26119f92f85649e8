//! Container control plane
//!
//! Narrow async traits over the orchestrator API. Adapters translate their
//! transport's failures into [`ErrorKind`](crate::error::ErrorKind) values,
//! so callers branch on kind instead of raw status codes.

pub mod cli;
pub mod engine;
#[cfg(test)]
pub(crate) mod fake;

pub use cli::CliEngine;
pub use engine::LocalEngine;

use crate::error::Result;
use crate::swarm::{Service, ServiceSpec, ServiceVersion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Image operations
#[async_trait]
pub trait ImageApi: Send + Sync {
    /// Pull an image, waiting for completion
    async fn pull_image(&self, image: &str) -> Result<()>;
}

/// Swarm service operations
#[async_trait]
pub trait ServiceApi: ImageApi {
    /// Inspect a service by name; `NotFound` when absent
    async fn inspect_service(&self, name: &str) -> Result<Service>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()>;

    /// Update a service, presenting the version token captured by inspect
    async fn update_service(&self, name: &str, version: ServiceVersion, spec: &ServiceSpec) -> Result<()>;
}

/// Cluster and network operations
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Inspect local swarm membership; any error means "not initialized"
    async fn inspect_swarm(&self) -> Result<()>;

    async fn init_swarm(&self, advertise_addr: &str, listen_addr: &str) -> Result<()>;

    /// Inspect a network by name; `NotFound` when absent
    async fn inspect_network(&self, name: &str) -> Result<()>;

    /// Create an attachable overlay network
    async fn create_network(&self, name: &str) -> Result<()>;
}

/// Standalone container operations
#[async_trait]
pub trait ContainerApi: ImageApi {
    /// Force-remove a container; `NotFound` when absent
    async fn remove_container(&self, name: &str) -> Result<()>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start_container(&self, name: &str) -> Result<()>;
}

/// Restart policy of a standalone container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// A standalone container definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    /// `host:container[:mode]` bind mounts
    pub binds: Vec<String>,
    /// TCP ports published on the same host port
    pub ports: Vec<u16>,
    /// e.g. `host`; default bridge when `None`
    pub network_mode: Option<String>,
    pub restart_policy: RestartPolicy,
}

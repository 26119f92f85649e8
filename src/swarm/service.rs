//! Desired and observed state of swarm services
//!
//! These types carry only what the managed services set. The engine adapter
//! converts them to and from the Docker API models.

use serde::{Deserialize, Serialize};

/// A service as last observed on the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    /// Token an update must present; stale tokens are rejected
    pub version: ServiceVersion,
    pub spec: ServiceSpec,
}

impl Service {
    pub fn replicas(&self) -> u64 {
        self.spec.replicas()
    }
}

/// Desired service settings, keyed by `name`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub task_template: TaskSpec,
    /// Unset means a single replica
    pub mode: Option<ServiceMode>,
    #[serde(default)]
    pub networks: Vec<NetworkAttachmentConfig>,
    pub endpoint_spec: Option<EndpointSpec>,
}

impl ServiceSpec {
    pub fn image(&self) -> Option<&str> {
        self.task_template
            .container_spec
            .as_ref()
            .map(|c| c.image.as_str())
    }

    pub fn replicas(&self) -> u64 {
        match self.mode {
            Some(ServiceMode::Replicated { replicas }) => replicas,
            Some(ServiceMode::Global) => 0,
            None => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub container_spec: Option<ContainerSpec>,
    pub placement: Option<Placement>,
    /// Bumping this counter redeploys tasks even when nothing else changed
    pub force_update: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    /// `KEY=value` pairs
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    /// Host path or volume name
    pub source: String,
    /// Path inside the container
    pub target: String,
    #[serde(rename = "type")]
    pub mount_type: MountType,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    /// Named volume, created by the engine on first use
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: name.into(),
            target: target.into(),
            mount_type: MountType::Volume,
            read_only: false,
        }
    }

    pub fn bind(host_path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: host_path.into(),
            target: target.into(),
            mount_type: MountType::Bind,
            read_only: false,
        }
    }
}

/// Node constraints, e.g. `node.role==manager`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ServiceMode {
    Replicated { replicas: u64 },
    /// One task per node
    Global,
}

/// Attachment to a named network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAttachmentConfig {
    pub target: String,
}

impl NetworkAttachmentConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// `Host` binds the port on the node running the task, bypassing the
/// routing mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    Ingress,
    Host,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub protocol: Protocol,
    pub published_port: u16,
    pub target_port: u16,
    pub publish_mode: PublishMode,
}

impl PortConfig {
    pub fn tcp(published: u16, target: u16, mode: PublishMode) -> Self {
        Self {
            protocol: Protocol::Tcp,
            published_port: published,
            target_port: target,
            publish_mode: mode,
        }
    }

    pub fn udp(published: u16, target: u16, mode: PublishMode) -> Self {
        Self {
            protocol: Protocol::Udp,
            ..Self::tcp(published, target, mode)
        }
    }
}

/// Optimistic concurrency token of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVersion {
    pub index: u64,
}

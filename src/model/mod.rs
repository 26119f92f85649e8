//! Records this engine reads from, and reports to, its collaborators

pub mod deployment;
pub mod metrics;
pub mod server;

pub use deployment::{Deployment, DeploymentStatus, DeploymentStore, MemoryDeploymentStore};
pub use metrics::resolve_metrics_port;
pub use server::{Inventory, Server, ServerRepository, ServerStatus, SshKey};

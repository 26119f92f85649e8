//! guildfleet - fleet provisioning and service reconciliation
//!
//! guildfleet prepares target machines for a self-hosted deployment platform
//! and keeps the platform's managed services running on them:
//!
//! - Bootstrap procedure generation for heterogeneous Linux targets
//! - Remote execution over SSH with streamed output
//! - Docker Swarm cluster and overlay network bootstrap
//! - Idempotent service reconciliation with optimistic concurrency
//! - Write-once reverse proxy configuration
//! - Monitoring sidecar supervision

pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod model;
pub mod monitoring;
pub mod provision;
pub mod proxy;
pub mod script;
pub mod ssh;
pub mod swarm;

pub use config::PlatformConfig;
pub use error::{FleetError, Result};

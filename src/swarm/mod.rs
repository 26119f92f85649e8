//! Docker Swarm bootstrap and service reconciliation
//!
//! This module brings the cluster and its overlay network into existence
//! and keeps the platform's managed services in line with their
//! definitions.

pub mod bootstrap;
pub mod managed;
pub mod reconcile;
pub mod service;

pub use bootstrap::{init_cluster, init_network, BootstrapOutcome};
pub use reconcile::{ensure_service, MergeHook, ReconcileOutcome, ServiceReconciler};
pub use service::{Service, ServiceSpec, ServiceVersion};

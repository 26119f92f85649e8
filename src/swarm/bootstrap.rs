//! Cluster and overlay network bootstrap
//!
//! Both procedures inspect first and act only when the object is absent.
//! The pair is not atomic: two callers racing past the inspect step may both
//! attempt the init, and the control plane settles which one wins.

use crate::config::SwarmBinding;
use crate::control::ClusterApi;
use crate::error::Result;
use tracing::info;

/// What a bootstrap call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    AlreadyPresent,
    Created,
}

/// Initialize the swarm unless this node already belongs to one.
///
/// A failed inspection is read as "not initialized", whatever the cause.
pub async fn init_cluster<C: ClusterApi + ?Sized>(api: &C, binding: &SwarmBinding) -> Result<BootstrapOutcome> {
    if api.inspect_swarm().await.is_ok() {
        info!("Swarm is already initialized");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    api.init_swarm(&binding.advertise_addr, &binding.listen_addr).await?;
    info!(
        "Swarm was initialized (advertise {}, listen {})",
        binding.advertise_addr, binding.listen_addr
    );
    Ok(BootstrapOutcome::Created)
}

/// Create the attachable overlay network unless it exists.
///
/// Only a not-found inspection leads to creation; any other failure
/// propagates.
pub async fn init_network<C: ClusterApi + ?Sized>(api: &C, name: &str) -> Result<BootstrapOutcome> {
    match api.inspect_network(name).await {
        Ok(()) => {
            info!("Network {} is already initialized", name);
            Ok(BootstrapOutcome::AlreadyPresent)
        }
        Err(err) if err.is_not_found() => {
            api.create_network(name).await?;
            info!("Network {} was initialized", name);
            Ok(BootstrapOutcome::Created)
        }
        Err(err) => Err(err),
    }
}

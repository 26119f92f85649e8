//! Provisioning flows
//!
//! [`ServerProvisioner`] bootstraps a registered server over the remote
//! gateway; [`HostBootstrap`] prepares the orchestrator's own host against
//! the local control plane.

pub mod host;
pub mod server;

pub use host::{scaffold_directories, HostBootstrap, HostReport};
pub use server::{ProgressSink, ServerProvisioner, SETUP_TITLE};

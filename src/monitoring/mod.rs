//! Monitoring sidecar supervision
//!
//! Entry points for the two kinds of target: a provisioned server, driven
//! through the remote gateway, and the orchestrator's own host, driven
//! through the local engine. Neither ever fails its caller.

pub mod supervisor;

pub use supervisor::{storage_prep_command, MonitoringSupervisor, MonitoringTarget};

use crate::config::PlatformConfig;
use crate::control::{CliEngine, LocalEngine};
use crate::error::Result;
use crate::exec::{LocalRunner, RemoteRunner};
use crate::model::ServerRepository;
use crate::ssh::{RemoteGateway, SshTarget};
use std::sync::Arc;
use tracing::error;

/// Replace the sidecar on a provisioned server. Returns whether it ran.
pub async fn setup_server_monitoring(
    config: &PlatformConfig,
    repo: &dyn ServerRepository,
    gateway: Arc<dyn RemoteGateway>,
    server_id: &str,
) -> bool {
    let attempt = async {
        let server = repo.find_server(server_id).await?;
        let target = SshTarget::for_server(repo, &server).await?;
        let runner = RemoteRunner::new(gateway, target);
        let engine = CliEngine::new(Arc::new(runner.clone()));

        let context = format!("server {}", server.name);
        let target = MonitoringTarget {
            context: &context,
            metrics_config: server.metrics_config.as_ref(),
            engine: &engine,
            runner: &runner,
            network_mode: Some("host"),
        };
        MonitoringSupervisor::new(config).ensure(&target).await
    };
    report(attempt.await, "remote")
}

/// Replace the sidecar on the orchestrator's own host. Returns whether it ran.
pub async fn setup_host_monitoring(config: &PlatformConfig, repo: &dyn ServerRepository) -> bool {
    let attempt = async {
        let metrics = repo.host_metrics_config().await?;
        let engine = LocalEngine::connect()?;
        let runner = LocalRunner;

        let target = MonitoringTarget {
            context: "the admin user",
            metrics_config: metrics.as_ref(),
            engine: &engine,
            runner: &runner,
            network_mode: None,
        };
        MonitoringSupervisor::new(config).ensure(&target).await
    };
    report(attempt.await, "local")
}

fn report(result: Result<()>, scope: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            error!("[Monitoring] Failed to setup {} monitoring: {}", scope, err);
            false
        }
    }
}

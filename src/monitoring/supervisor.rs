//! Metrics sidecar lifecycle
//!
//! Exactly one sidecar runs per target under a fixed name. Every run
//! destroys whatever container holds that name and creates a fresh one with
//! the target's current metrics configuration.

use crate::config::PlatformConfig;
use crate::control::{ContainerApi, ContainerSpec, RestartPolicy};
use crate::error::Result;
use crate::exec::{shell, CommandRunner};
use crate::model::resolve_metrics_port;
use serde_json::Value;
use std::path::Path;
use tracing::{error, info};

/// Read-only host mounts the sidecar inspects
const HOST_BINDS: [&str; 4] = [
    "/var/run/docker.sock:/var/run/docker.sock:ro",
    "/sys:/host/sys:ro",
    "/etc/os-release:/etc/os-release:ro",
    "/proc:/host/proc:ro",
];

/// Database path inside the sidecar
const STORAGE_MOUNT: &str = "/app/monitoring.db";

/// One monitored machine and the handles needed to act on it
pub struct MonitoringTarget<'a> {
    /// Names the target in logs and errors, e.g. `the server`
    pub context: &'a str,
    pub metrics_config: Option<&'a Value>,
    pub engine: &'a dyn ContainerApi,
    /// Runs the storage preparation on the same machine as `engine`
    pub runner: &'a dyn CommandRunner,
    /// `host` for provisioned servers; bridge networking otherwise
    pub network_mode: Option<&'a str>,
}

/// Keeps the sidecar running with current configuration
pub struct MonitoringSupervisor<'a> {
    config: &'a PlatformConfig,
}

impl<'a> MonitoringSupervisor<'a> {
    pub fn new(config: &'a PlatformConfig) -> Self {
        Self { config }
    }

    /// Image for the sidecar. Canary when the platform runs a non-stable tag
    /// or in development, but never in cloud mode.
    pub fn image(&self) -> String {
        let monitoring = &self.config.monitoring;
        let canary = (self.config.image_tag != monitoring.stable_tag || self.config.is_development())
            && !self.config.cloud;
        let tag = if canary {
            &monitoring.canary_tag
        } else {
            &monitoring.stable_tag
        };
        format!("{}:{}", monitoring.image_repository, tag)
    }

    /// Container definition for a resolved port
    pub fn container_spec(&self, metrics_config: Option<&Value>, port: u16, network_mode: Option<&str>) -> Result<ContainerSpec> {
        let monitoring = &self.config.monitoring;
        let serialized = match metrics_config {
            Some(value) => serde_json::to_string(value)?,
            None => "null".to_string(),
        };

        let mut binds: Vec<String> = HOST_BINDS.iter().map(|b| b.to_string()).collect();
        binds.push(format!("{}:{}", monitoring.storage_path.display(), STORAGE_MOUNT));

        Ok(ContainerSpec {
            name: monitoring.container_name.clone(),
            image: self.image(),
            env: vec![format!("METRICS_CONFIG={}", serialized)],
            binds,
            ports: vec![port],
            network_mode: network_mode.map(str::to_string),
            restart_policy: RestartPolicy::Always,
        })
    }

    /// Replace the sidecar on `target`, propagating the first failure.
    ///
    /// Port resolution happens before anything touches the target.
    pub async fn ensure(&self, target: &MonitoringTarget<'_>) -> Result<()> {
        let port = resolve_metrics_port(target.metrics_config, target.context)?;
        let spec = self.container_spec(target.metrics_config, port, target.network_mode)?;

        target
            .runner
            .run(&storage_prep_command(&self.config.monitoring.storage_path))
            .await?;
        target.engine.pull_image(&spec.image).await?;

        match target.engine.remove_container(&spec.name).await {
            Ok(()) => info!("[Monitoring] Removed existing container ({})", target.context),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        target.engine.create_container(&spec).await?;
        target.engine.start_container(&spec.name).await?;
        info!("[Monitoring] Container started ({}) ✅", target.context);
        Ok(())
    }

    /// Like [`ensure`](Self::ensure), but failures are logged and swallowed.
    /// Returns whether the sidecar was replaced.
    pub async fn supervise(&self, target: &MonitoringTarget<'_>) -> bool {
        match self.ensure(target).await {
            Ok(()) => true,
            Err(err) => {
                error!("[Monitoring] Failed to set up monitoring for {}: {}", target.context, err);
                false
            }
        }
    }
}

/// Create the storage directory and backing file
pub fn storage_prep_command(storage_path: &Path) -> String {
    let file = shell::quote(&storage_path.display().to_string());
    match storage_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => format!(
            "mkdir -p {} && touch {}",
            shell::quote(&dir.display().to_string()),
            file
        ),
        _ => format!("touch {}", file),
    }
}

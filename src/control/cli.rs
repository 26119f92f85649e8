//! Container control over the `docker` CLI
//!
//! Provisioned servers expose no engine socket to the orchestrator, so the
//! remote monitoring path drives the CLI through a [`CommandRunner`], one
//! command per session.

use super::{ContainerApi, ContainerSpec, ImageApi};
use crate::error::{FleetError, Result};
use crate::exec::shell::quote;
use crate::exec::CommandRunner;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `docker` CLI adapter
#[derive(Clone)]
pub struct CliEngine {
    runner: Arc<dyn CommandRunner>,
}

impl CliEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn docker(&self, args: &str, subject: &str) -> Result<String> {
        let command = format!("docker {}", args);
        debug!("{}: {}", self.runner.label(), command);
        match self.runner.run(&command).await {
            Ok(output) => Ok(output.stdout),
            Err(err) => Err(classify(err, subject)),
        }
    }
}

/// Map CLI stderr onto the error kinds callers branch on
fn classify(err: FleetError, subject: &str) -> FleetError {
    let FleetError::Command { output, .. } = &err else {
        return err;
    };
    let lower = output.to_ascii_lowercase();
    if lower.contains("no such container") || lower.contains("no such image") || lower.contains("not found") {
        FleetError::NotFound(format!("{}: {}", subject, output))
    } else if lower.contains("conflict") || lower.contains("already in use") || lower.contains("already exists") {
        FleetError::Conflict(format!("{}: {}", subject, output))
    } else {
        err
    }
}

/// Render `docker create` arguments for a container definition
fn create_args(spec: &ContainerSpec) -> String {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        quote(&spec.name),
        "--restart".to_string(),
        spec.restart_policy.as_str().to_string(),
    ];
    if let Some(mode) = &spec.network_mode {
        args.push("--network".to_string());
        args.push(quote(mode));
    }
    for env in &spec.env {
        args.push("-e".to_string());
        args.push(quote(env));
    }
    for bind in &spec.binds {
        args.push("-v".to_string());
        args.push(quote(bind));
    }
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{0}:{0}/tcp", port));
    }
    args.push(quote(&spec.image));
    args.join(" ")
}

#[async_trait]
impl ImageApi for CliEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.docker(&format!("pull {}", quote(image)), image).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerApi for CliEngine {
    async fn remove_container(&self, name: &str) -> Result<()> {
        self.docker(&format!("rm -f {}", quote(name)), name).await?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.docker(&create_args(spec), &spec.name).await?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker(&format!("start {}", quote(name)), name).await?;
        Ok(())
    }
}

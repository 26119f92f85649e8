//! Command runners for local and remote targets
//!
//! Storage preparation, proxy config writes and the remote container API all
//! run short shell commands either on the orchestrator itself or on a
//! provisioned server. [`CommandRunner`] hides which.

pub mod shell;

use crate::error::{FleetError, Result};
use crate::ssh::{self, RemoteGateway, SshTarget};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a shell command to completion. A non-zero exit is an error carrying
/// the command's stderr.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Short label used in logs, e.g. `local` or `remote 10.0.0.5`
    fn label(&self) -> String;
}

/// Runs commands with `sh -c` on this host
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!("Running locally: {}", command);
        let output = Command::new("sh").arg("-c").arg(command).output().await?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.status.success() {
            Ok(result)
        } else {
            Err(FleetError::Command {
                command: command.to_string(),
                output: failure_text(&result),
            })
        }
    }

    fn label(&self) -> String {
        "local".to_string()
    }
}

/// Runs commands on a server through the remote gateway, one session each
#[derive(Clone)]
pub struct RemoteRunner {
    gateway: Arc<dyn RemoteGateway>,
    target: SshTarget,
}

impl RemoteRunner {
    pub fn new(gateway: Arc<dyn RemoteGateway>, target: SshTarget) -> Self {
        Self { gateway, target }
    }
}

#[async_trait]
impl CommandRunner for RemoteRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!("Running on {}: {}", self.target.host, command);
        let captured = ssh::capture(self.gateway.as_ref(), &self.target, command).await?;

        let result = CommandOutput {
            stdout: captured.stdout,
            stderr: captured.stderr,
        };

        if captured.outcome.success() {
            Ok(result)
        } else {
            Err(FleetError::Command {
                command: command.to_string(),
                output: failure_text(&result),
            })
        }
    }

    fn label(&self) -> String {
        format!("remote {}", self.target.host)
    }
}

fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        output.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

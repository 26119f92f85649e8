//! Provisioning a registered server over the remote gateway

use crate::config::PlatformConfig;
use crate::error::{FleetError, Result};
use crate::model::{Deployment, DeploymentStatus, DeploymentStore, Server, ServerRepository};
use crate::script::{ScriptGenerator, TargetFacts};
use crate::ssh::{self, RemoteGateway, SshTarget};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Title and description of provisioning deployments
pub const SETUP_TITLE: &str = "Setup Server";

/// Human readable progress lines for display
pub type ProgressSink = mpsc::UnboundedSender<String>;

/// Runs the bootstrap procedure on a server and records the attempt as a
/// deployment.
///
/// Attempts against the same server are not serialized here; callers must
/// avoid invoking this twice for one server at a time.
pub struct ServerProvisioner<'a> {
    config: &'a PlatformConfig,
    servers: &'a dyn ServerRepository,
    deployments: &'a dyn DeploymentStore,
    gateway: Arc<dyn RemoteGateway>,
}

impl<'a> ServerProvisioner<'a> {
    pub fn new(
        config: &'a PlatformConfig,
        servers: &'a dyn ServerRepository,
        deployments: &'a dyn DeploymentStore,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        Self {
            config,
            servers,
            deployments,
            gateway,
        }
    }

    /// Provision `server_id`.
    ///
    /// An inactive server is refused before a deployment is created or the
    /// gateway is touched. Otherwise the deployment is finalized exactly once:
    /// `done`, or `error` with the failure appended to its log, in which case
    /// the failure is also returned.
    pub async fn setup_server(&self, server_id: &str, progress: Option<&ProgressSink>) -> Result<Deployment> {
        let server = self.servers.find_server(server_id).await?;
        if !server.is_active() {
            return Err(FleetError::ServerInactive(server.name.clone()));
        }

        let deployment = self
            .deployments
            .create(&server.id, SETUP_TITLE, SETUP_TITLE)
            .await?;
        info!("Setting up server {} (deployment {})", server.name, deployment.id);

        match self.install(&server, &deployment.id, progress).await {
            Ok(()) => {
                self.emit_closing(&deployment.id, progress, "\nSetup Server: ✅\n").await;
                self.deployments
                    .finalize(&deployment.id, DeploymentStatus::Done)
                    .await
            }
            Err(err) => {
                error!("Setup of server {} failed: {}", server.name, err);
                self.emit_closing(&deployment.id, progress, &format!("{} ❌\n", err)).await;
                self.deployments
                    .finalize(&deployment.id, DeploymentStatus::Error)
                    .await?;
                Err(err)
            }
        }
    }

    /// Last log line of an attempt. The deployment is finalized whether or
    /// not the line could be stored.
    async fn emit_closing(&self, deployment_id: &str, progress: Option<&ProgressSink>, text: &str) {
        if let Err(err) = self.emit(deployment_id, progress, text).await {
            warn!("Could not append to deployment {} log: {}", deployment_id, err);
        }
    }

    async fn install(&self, server: &Server, deployment_id: &str, progress: Option<&ProgressSink>) -> Result<()> {
        self.emit(deployment_id, progress, "\nInstalling Server Dependencies: ✅\n")
            .await?;

        let target = SshTarget::for_server(self.servers, server).await?;
        target.require_key()?;

        let command = match server.override_command() {
            Some(command) => command.to_string(),
            None => self.generated_command(&target).await?,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let exec = self.gateway.exec(&target, &command, tx);
        let forward = async {
            let mut tail = String::new();
            while let Some(chunk) = rx.recv().await {
                self.emit(deployment_id, progress, chunk.text()).await?;
                tail.push_str(chunk.text());
            }
            Ok::<_, FleetError>(tail)
        };

        let (outcome, tail) = tokio::join!(exec, forward);
        let outcome = outcome?;
        let tail = tail?;

        if outcome.success() {
            Ok(())
        } else {
            let status = outcome.exit_status.unwrap_or(255);
            let output = match &outcome.signal {
                Some(signal) => format!("terminated by signal {}", signal),
                None => last_lines(&tail, 5),
            };
            Err(FleetError::RemoteExit { status, output })
        }
    }

    async fn generated_command(&self, target: &SshTarget) -> Result<String> {
        let probe = ssh::capture(self.gateway.as_ref(), target, TargetFacts::probe_command()).await?;
        if !probe.outcome.success() {
            return Err(FleetError::RemoteExit {
                status: probe.outcome.exit_status.unwrap_or(255),
                output: probe.stderr.trim().to_string(),
            });
        }

        let facts = TargetFacts::parse_probe(&probe.stdout)?;
        info!(
            "Target {} runs {} {} ({})",
            target.host, facts.os, facts.os_version, facts.arch
        );
        Ok(ScriptGenerator::new(self.config).generate(&facts)?.render())
    }

    async fn emit(&self, deployment_id: &str, progress: Option<&ProgressSink>, text: &str) -> Result<()> {
        self.deployments.append_log(deployment_id, text).await?;
        if let Some(progress) = progress {
            let _ = progress.send(text.to_string());
        }
        Ok(())
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

//! guildfleet - fleet provisioning and service reconciliation
//!
//! This is the main CLI entry point for guildfleet.

use anyhow::Context;
use clap::{Parser, Subcommand};
use guildfleet::config::{PathScope, PlatformConfig};
use guildfleet::control::LocalEngine;
use guildfleet::dispatch::{DeployClient, DeploymentJob};
use guildfleet::exec::RemoteRunner;
use guildfleet::model::{Inventory, MemoryDeploymentStore, ServerRepository};
use guildfleet::monitoring::{setup_host_monitoring, setup_server_monitoring};
use guildfleet::provision::{HostBootstrap, ServerProvisioner};
use guildfleet::proxy::{dashboard_routing, LocalTarget, ProxySynchronizer, RemoteTarget};
use guildfleet::script::ScriptGenerator;
use guildfleet::ssh::{RemoteGateway, RusshGateway, SshTarget};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// guildfleet - provision servers and reconcile managed services
#[derive(Parser)]
#[command(name = "guildfleet")]
#[command(version)]
#[command(about = "Fleet provisioning and service reconciliation engine", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Platform configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bootstrap procedure for a target
    Script {
        /// Operating system ID, as in /etc/os-release
        #[arg(long)]
        os: String,
        /// CPU architecture
        #[arg(long, default_value = "x86_64")]
        arch: String,
        /// Operating system version
        #[arg(long)]
        os_version: Option<String>,
    },

    /// Provision a registered server
    SetupServer {
        /// Server ID
        server_id: String,
        /// Inventory file
        #[arg(short, long)]
        inventory: PathBuf,
    },

    /// Bootstrap the orchestrator's own host
    BootstrapHost {
        /// Dashboard domain to route
        #[arg(long)]
        domain: Option<String>,
    },

    /// Replace the monitoring sidecar on a server or on this host
    Monitor {
        /// Server ID
        #[arg(long, conflicts_with = "host")]
        server: Option<String>,
        /// Monitor this host instead of a server
        #[arg(long)]
        host: bool,
        /// Inventory file
        #[arg(short, long)]
        inventory: PathBuf,
    },

    /// Write proxy configuration without overwriting existing files
    SyncProxy {
        /// Server ID; this host when omitted
        #[arg(long, requires = "inventory")]
        server: Option<String>,
        /// Inventory file
        #[arg(short, long)]
        inventory: Option<PathBuf>,
        /// Dashboard domain to route
        #[arg(long)]
        host: Option<String>,
    },

    /// Enqueue an application deployment with the deployments service
    Deploy {
        /// Server ID
        server_id: String,
        /// Inventory file
        #[arg(short, long)]
        inventory: PathBuf,
        /// Application ID
        #[arg(long)]
        application_id: String,
        /// Deployment title
        #[arg(long, default_value = "Manual deployment")]
        title: String,
    },
}

fn load_inventory(path: &Path) -> anyhow::Result<Inventory> {
    Inventory::load(path).with_context(|| format!("loading inventory {}", path.display()))
}

fn gateway(config: &PlatformConfig) -> Arc<dyn RemoteGateway> {
    Arc::new(RusshGateway::new(Duration::from_secs(config.ssh_connect_timeout_secs)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = PlatformConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Script {
            os,
            arch,
            os_version,
        } => {
            let text = ScriptGenerator::new(&config).render(&os, os_version.as_deref(), &arch)?;
            print!("{}", text);
        }

        Commands::SetupServer {
            server_id,
            inventory,
        } => {
            let inventory = load_inventory(&inventory)?;
            let deployments = MemoryDeploymentStore::new();
            let provisioner = ServerProvisioner::new(&config, &inventory, &deployments, gateway(&config));

            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let printer = tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    print!("{}", line);
                }
            });

            let result = provisioner.setup_server(&server_id, Some(&tx)).await;
            drop(tx);
            printer.await?;

            let deployment = result?;
            info!("Deployment {} finished: {:?}", deployment.id, deployment.status);
        }

        Commands::BootstrapHost { domain } => {
            let engine = LocalEngine::connect()?;
            let report = HostBootstrap::new(&config, &engine).run(domain.as_deref()).await?;
            for (name, outcome) in &report.services {
                println!("{}: {:?}", name, outcome);
            }
        }

        Commands::Monitor {
            server,
            host,
            inventory,
        } => {
            let inventory = load_inventory(&inventory)?;
            let replaced = match server {
                Some(server_id) => {
                    setup_server_monitoring(&config, &inventory, gateway(&config), &server_id).await
                }
                None if host => setup_host_monitoring(&config, &inventory).await,
                None => anyhow::bail!("either --server or --host is required"),
            };
            if !replaced {
                warn!("Monitoring sidecar was not replaced, see the log above");
            }
        }

        Commands::SyncProxy {
            server,
            inventory,
            host,
        } => {
            let routing = host.as_deref().map(|domain| dashboard_routing(&config, domain));
            let report = match (server, inventory) {
                (Some(server_id), Some(inventory)) => {
                    let inventory = load_inventory(&inventory)?;
                    let server = inventory.find_server(&server_id).await?;
                    let target = SshTarget::for_server(&inventory, &server).await?;
                    let remote = RemoteTarget::new(Arc::new(RemoteRunner::new(gateway(&config), target)));
                    ProxySynchronizer::new(&config, config.paths(PathScope::Remote), &remote)
                        .sync_all(routing.as_ref())
                        .await?
                }
                _ => {
                    let local = LocalTarget;
                    ProxySynchronizer::new(&config, config.paths(PathScope::Local), &local)
                        .sync_all(routing.as_ref())
                        .await?
                }
            };
            for path in &report.written {
                println!("written  {}", path.display());
            }
            for path in &report.skipped {
                println!("kept     {}", path.display());
            }
        }

        Commands::Deploy {
            server_id,
            inventory,
            application_id,
            title,
        } => {
            let inventory = load_inventory(&inventory)?;
            let server = inventory.find_server(&server_id).await?;
            let client = DeployClient::new(config.deploy_service.clone())?;
            let job = DeploymentJob::deploy(&application_id, &title, &server.id);
            let response = client.enqueue(&server, &job).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

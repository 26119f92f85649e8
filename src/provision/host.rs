//! Bootstrap of the orchestrator's own host

use crate::config::{PathScope, Paths, PlatformConfig};
use crate::control::{ClusterApi, ServiceApi};
use crate::error::Result;
use crate::proxy::{dashboard_routing, LocalTarget, ProxySynchronizer, SyncReport};
use crate::swarm::managed::{self, keep_force_update};
use crate::swarm::{init_cluster, init_network, BootstrapOutcome, ReconcileOutcome, ServiceReconciler};
use std::os::unix::fs::PermissionsExt;
use tracing::info;

/// Owner-only mode of the credential directory
const SSH_DIR_MODE: u32 = 0o700;

/// What a host bootstrap did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub cluster: BootstrapOutcome,
    pub network: BootstrapOutcome,
    pub proxy_files: SyncReport,
    /// Outcome per managed service, in reconciliation order
    pub services: Vec<(String, ReconcileOutcome)>,
}

/// Brings the local cluster, network, proxy configuration and managed
/// services into place. Every step is safe to repeat.
pub struct HostBootstrap<'a, E: ServiceApi + ClusterApi + ?Sized> {
    config: &'a PlatformConfig,
    engine: &'a E,
}

impl<'a, E: ServiceApi + ClusterApi + ?Sized> HostBootstrap<'a, E> {
    pub fn new(config: &'a PlatformConfig, engine: &'a E) -> Self {
        Self { config, engine }
    }

    /// Run the bootstrap. With `domain`, the dashboard routing file is
    /// written as well.
    pub async fn run(&self, domain: Option<&str>) -> Result<HostReport> {
        let config = self.config;
        let paths = config.paths(PathScope::Local);
        scaffold_directories(&paths).await?;

        let target = LocalTarget;
        let sync = ProxySynchronizer::new(config, paths.clone(), &target);
        let mut proxy_files = SyncReport::default();
        sync.sync_middlewares(&mut proxy_files).await?;

        let cluster = init_cluster(self.engine, &config.swarm).await?;
        let network = init_network(self.engine, &config.network_name).await?;

        sync.sync_static(&mut proxy_files).await?;
        if let Some(domain) = domain {
            sync.sync_routing(&dashboard_routing(config, domain), &mut proxy_files)
                .await?;
        }

        let reconciler = ServiceReconciler::new(self.engine);
        let mut services = Vec::new();

        let proxy = managed::proxy(config, &paths);
        let outcome = reconciler
            .ensure(&config.proxy.image_ref(), proxy, Some(&keep_force_update))
            .await?;
        services.push((config.proxy.container_name.clone(), outcome));

        for spec in [managed::cache(config), managed::metadata_store(config)] {
            let name = spec.name.clone();
            let image = spec.image().unwrap_or_default().to_string();
            let outcome = reconciler.ensure(&image, spec, None).await?;
            services.push((name, outcome));
        }

        info!("Host bootstrap complete under {}", paths.base.display());
        Ok(HostReport {
            cluster,
            network,
            proxy_files,
            services,
        })
    }
}

/// Create the local layout; the credential directory is owner-only
pub async fn scaffold_directories(paths: &Paths) -> Result<()> {
    for dir in paths.all() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::set_permissions(&paths.ssh, std::fs::Permissions::from_mode(SSH_DIR_MODE)).await?;
    Ok(())
}

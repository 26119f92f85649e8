//! Definitions of the platform's managed services

use super::service::{
    ContainerSpec, EndpointSpec, Mount, NetworkAttachmentConfig, Placement, PortConfig,
    PublishMode, Service, ServiceMode, ServiceSpec, TaskSpec,
};
use crate::config::{ManagedStoreSettings, Paths, PlatformConfig};

/// Managed services only run on manager nodes
pub const MANAGER_CONSTRAINT: &str = "node.role==manager";

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

fn base_spec(name: &str, container: ContainerSpec, network: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        task_template: TaskSpec {
            container_spec: Some(container),
            placement: Some(Placement {
                constraints: vec![MANAGER_CONSTRAINT.to_string()],
            }),
            ..Default::default()
        },
        mode: Some(ServiceMode::Replicated { replicas: 1 }),
        networks: vec![NetworkAttachmentConfig::new(network)],
        endpoint_spec: None,
        ..Default::default()
    }
}

/// A stateful store: one volume, optional credentials, and in development a
/// host-mode published port so the orchestrator can reach it directly.
pub fn store_spec(config: &PlatformConfig, store: &ManagedStoreSettings) -> ServiceSpec {
    let container = ContainerSpec {
        image: store.image.clone(),
        env: store.env.clone(),
        mounts: vec![Mount::volume(&store.volume, &store.data_path)],
        ..Default::default()
    };
    let mut spec = base_spec(&store.name, container, &config.network_name);
    if config.is_development() {
        spec.endpoint_spec = Some(EndpointSpec {
            ports: vec![PortConfig::tcp(store.port, store.port, PublishMode::Host)],
        });
    }
    spec
}

/// The metadata store (postgres)
pub fn metadata_store(config: &PlatformConfig) -> ServiceSpec {
    store_spec(config, &config.metadata_store)
}

/// The cache (redis)
pub fn cache(config: &PlatformConfig) -> ServiceSpec {
    store_spec(config, &config.cache)
}

/// The reverse proxy, bound to the static and dynamic config on `paths`
pub fn proxy(config: &PlatformConfig, paths: &Paths) -> ServiceSpec {
    let proxy = &config.proxy;
    let dynamic = paths.traefik_dynamic.display().to_string();
    let container = ContainerSpec {
        image: proxy.image_ref(),
        mounts: vec![
            Mount::bind(paths.traefik_config().display().to_string(), "/etc/traefik/traefik.yml"),
            Mount::bind(dynamic.clone(), dynamic),
            Mount::bind(DOCKER_SOCKET, DOCKER_SOCKET),
        ],
        ..Default::default()
    };

    let mut spec = base_spec(&proxy.container_name, container, &config.network_name);
    spec.endpoint_spec = Some(EndpointSpec {
        ports: vec![
            PortConfig::tcp(proxy.http_port, proxy.http_port, PublishMode::Host),
            PortConfig::tcp(proxy.https_port, proxy.https_port, PublishMode::Host),
            PortConfig::udp(proxy.http3_port, proxy.http3_port, PublishMode::Host),
        ],
    });
    spec
}

/// Merge hook keeping the live force-update counter, so reconciling the
/// proxy never forces a restart on its own
pub fn keep_force_update(live: &Service, mut desired: ServiceSpec) -> ServiceSpec {
    desired.task_template.force_update = live.spec.task_template.force_update;
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, PathScope};
    use crate::swarm::service::{Protocol, ServiceVersion};

    #[test]
    fn test_store_ports_only_in_development() {
        let mut config = PlatformConfig::default();
        assert!(cache(&config).endpoint_spec.is_none());

        config.environment = Environment::Development;
        let spec = metadata_store(&config);
        let ports = spec.endpoint_spec.unwrap().ports;
        assert_eq!(ports, vec![PortConfig::tcp(5432, 5432, PublishMode::Host)]);
    }

    #[test]
    fn test_store_definition() {
        let config = PlatformConfig::default();
        let spec = cache(&config);

        assert_eq!(spec.name, "guildserver-redis");
        assert_eq!(spec.image(), Some("redis:7"));
        assert_eq!(spec.replicas(), 1);
        assert_eq!(spec.networks[0].target, "guildserver-network");
        assert_eq!(
            spec.task_template.placement.unwrap().constraints,
            vec!["node.role==manager".to_string()]
        );
    }

    #[test]
    fn test_proxy_definition() {
        let config = PlatformConfig::default();
        let spec = proxy(&config, &config.paths(PathScope::Remote));

        assert_eq!(spec.image(), Some("traefik:v3.1.2"));
        let ports = spec.endpoint_spec.unwrap().ports;
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[2].protocol, Protocol::Udp);

        let mounts = &spec.task_template.container_spec.unwrap().mounts;
        assert!(mounts.iter().any(|m| m.target == "/etc/traefik/traefik.yml"));
    }

    #[test]
    fn test_keep_force_update() {
        let config = PlatformConfig::default();
        let mut live_spec = proxy(&config, &config.paths(PathScope::Remote));
        live_spec.task_template.force_update = Some(9);
        let live = Service {
            id: "abc".to_string(),
            version: ServiceVersion { index: 12 },
            spec: live_spec,
        };

        let merged = keep_force_update(&live, proxy(&config, &config.paths(PathScope::Remote)));
        assert_eq!(merged.task_template.force_update, Some(9));
    }
}

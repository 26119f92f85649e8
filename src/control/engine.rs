//! Local control plane over the Docker Engine API

use super::{ClusterApi, ContainerApi, ContainerSpec, ImageApi, RestartPolicy, ServiceApi};
use crate::error::{FleetError, Result};
use crate::swarm::service::{
    ContainerSpec as TaskContainer, EndpointSpec, Mount, MountType, NetworkAttachmentConfig,
    Placement, PortConfig, Protocol, PublishMode, Service, ServiceMode, ServiceSpec,
    ServiceVersion, TaskSpec,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models;
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::service::{InspectServiceOptions, UpdateServiceOptions};
use bollard::swarm::InitSwarmOptions;
use bollard::Docker;
use futures_util::TryStreamExt;
use std::collections::HashMap;
use tracing::debug;

/// Message the engine returns when an update presents a stale version
const OUT_OF_SEQUENCE: &str = "update out of sequence";

/// Control plane on the orchestrator's own host
#[derive(Clone)]
pub struct LocalEngine {
    docker: Docker,
}

impl LocalEngine {
    /// Connect through the default local socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| FleetError::Transport(format!("Docker engine unavailable: {}", e)))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Map an engine failure onto the error kinds callers branch on
fn classify(err: DockerError, subject: &str) -> FleetError {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => FleetError::NotFound(format!("{}: {}", subject, message)),
            409 => FleetError::Conflict(format!("{}: {}", subject, message)),
            status => FleetError::Api { status, message },
        },
        other => FleetError::Transport(other.to_string()),
    }
}

/// Like [`classify`], but recognizes stale version rejections on update
fn classify_update(err: DockerError, name: &str, version: ServiceVersion) -> FleetError {
    if let DockerError::DockerResponseServerError { message, .. } = &err {
        if message.contains(OUT_OF_SEQUENCE) {
            return FleetError::StaleVersion {
                name: name.to_string(),
                version: version.index,
                message: message.clone(),
            };
        }
    }
    classify(err, name)
}

#[async_trait]
impl ImageApi for LocalEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| classify(e, image))?;
        debug!("Pulled image {}", image);
        Ok(())
    }
}

#[async_trait]
impl ServiceApi for LocalEngine {
    async fn inspect_service(&self, name: &str) -> Result<Service> {
        let service = self
            .docker
            .inspect_service(name, Some(InspectServiceOptions { insert_defaults: true }))
            .await
            .map_err(|e| classify(e, name))?;

        Ok(Service {
            id: service.id.unwrap_or_default(),
            version: ServiceVersion {
                index: service.version.and_then(|v| v.index).unwrap_or_default(),
            },
            spec: service.spec.map(spec_from_engine).unwrap_or_default(),
        })
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        self.docker
            .create_service(spec_to_engine(spec), None)
            .await
            .map_err(|e| classify(e, &spec.name))?;
        Ok(())
    }

    async fn update_service(&self, name: &str, version: ServiceVersion, spec: &ServiceSpec) -> Result<()> {
        let options = UpdateServiceOptions {
            version: version.index,
            ..Default::default()
        };
        self.docker
            .update_service(name, spec_to_engine(spec), options, None)
            .await
            .map_err(|e| classify_update(e, name, version))?;
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for LocalEngine {
    async fn inspect_swarm(&self) -> Result<()> {
        self.docker
            .inspect_swarm()
            .await
            .map_err(|e| classify(e, "swarm"))?;
        Ok(())
    }

    async fn init_swarm(&self, advertise_addr: &str, listen_addr: &str) -> Result<()> {
        let options = InitSwarmOptions {
            listen_addr,
            advertise_addr,
        };
        self.docker
            .init_swarm(options)
            .await
            .map_err(|e| classify(e, "swarm"))?;
        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> Result<()> {
        self.docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| classify(e, name))?;
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let options = CreateNetworkOptions {
            name,
            driver: "overlay",
            attachable: true,
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| classify(e, name))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerApi for LocalEngine {
    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| classify(e, name))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), container_to_engine(spec))
            .await
            .map_err(|e| classify(e, &spec.name))?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, name))
    }
}

fn container_to_engine(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &spec.ports {
        let key = format!("{}/tcp", port);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![models::PortBinding {
                host_ip: None,
                host_port: Some(port.to_string()),
            }]),
        );
    }

    let restart = match spec.restart_policy {
        RestartPolicy::No => models::RestartPolicyNameEnum::NO,
        RestartPolicy::Always => models::RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => models::RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(models::HostConfig {
            binds: Some(spec.binds.clone()),
            port_bindings: Some(port_bindings),
            network_mode: spec.network_mode.clone(),
            restart_policy: Some(models::RestartPolicy {
                name: Some(restart),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn spec_to_engine(spec: &ServiceSpec) -> models::ServiceSpec {
    let container = spec.task_template.container_spec.as_ref().map(|c| {
        models::TaskSpecContainerSpec {
            image: Some(c.image.clone()),
            env: Some(c.env.clone()),
            mounts: Some(
                c.mounts
                    .iter()
                    .map(|m| models::Mount {
                        target: Some(m.target.clone()),
                        source: Some(m.source.clone()),
                        typ: Some(match m.mount_type {
                            MountType::Bind => models::MountTypeEnum::BIND,
                            MountType::Volume => models::MountTypeEnum::VOLUME,
                        }),
                        read_only: Some(m.read_only),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    });

    let mode = spec.mode.map(|mode| match mode {
        ServiceMode::Replicated { replicas } => models::ServiceSpecMode {
            replicated: Some(models::ServiceSpecModeReplicated {
                replicas: Some(replicas as i64),
            }),
            ..Default::default()
        },
        ServiceMode::Global => models::ServiceSpecMode {
            global: Some(Default::default()),
            ..Default::default()
        },
    });

    let endpoint = spec.endpoint_spec.as_ref().map(|e| models::EndpointSpec {
        ports: Some(
            e.ports
                .iter()
                .map(|p| models::EndpointPortConfig {
                    protocol: Some(match p.protocol {
                        Protocol::Tcp => models::EndpointPortConfigProtocolEnum::TCP,
                        Protocol::Udp => models::EndpointPortConfigProtocolEnum::UDP,
                    }),
                    target_port: Some(p.target_port as i64),
                    published_port: Some(p.published_port as i64),
                    publish_mode: Some(match p.publish_mode {
                        PublishMode::Ingress => models::EndpointPortConfigPublishModeEnum::INGRESS,
                        PublishMode::Host => models::EndpointPortConfigPublishModeEnum::HOST,
                    }),
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    });

    models::ServiceSpec {
        name: Some(spec.name.clone()),
        task_template: Some(models::TaskSpec {
            container_spec: container,
            placement: spec
                .task_template
                .placement
                .as_ref()
                .map(|p| models::TaskSpecPlacement {
                    constraints: Some(p.constraints.clone()),
                    ..Default::default()
                }),
            force_update: spec.task_template.force_update,
            networks: Some(
                spec.networks
                    .iter()
                    .map(|n| models::NetworkAttachmentConfig {
                        target: Some(n.target.clone()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        mode,
        endpoint_spec: endpoint,
        ..Default::default()
    }
}

fn spec_from_engine(spec: models::ServiceSpec) -> ServiceSpec {
    let task = spec.task_template.unwrap_or_default();

    // Engines before API 1.44 may still report attachments on the service itself
    let networks = task
        .networks
        .or(spec.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|n| NetworkAttachmentConfig::new(n.target.unwrap_or_default()))
        .collect();

    let container_spec = task.container_spec.map(|c| TaskContainer {
        image: c.image.unwrap_or_default(),
        env: c.env.unwrap_or_default(),
        mounts: c
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| Mount {
                target: m.target.unwrap_or_default(),
                source: m.source.unwrap_or_default(),
                mount_type: match m.typ {
                    Some(models::MountTypeEnum::BIND) => MountType::Bind,
                    _ => MountType::Volume,
                },
                read_only: m.read_only.unwrap_or(false),
            })
            .collect(),
    });

    let mode = spec.mode.map(|mode| match mode.replicated {
        Some(replicated) => ServiceMode::Replicated {
            replicas: replicated.replicas.unwrap_or(1).max(0) as u64,
        },
        None => ServiceMode::Global,
    });

    let endpoint_spec = spec.endpoint_spec.map(|e| EndpointSpec {
        ports: e
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| PortConfig {
                protocol: match p.protocol {
                    Some(models::EndpointPortConfigProtocolEnum::UDP) => Protocol::Udp,
                    _ => Protocol::Tcp,
                },
                target_port: p.target_port.unwrap_or_default() as u16,
                published_port: p.published_port.unwrap_or_default() as u16,
                publish_mode: match p.publish_mode {
                    Some(models::EndpointPortConfigPublishModeEnum::HOST) => PublishMode::Host,
                    _ => PublishMode::Ingress,
                },
            })
            .collect(),
    });

    ServiceSpec {
        name: spec.name.unwrap_or_default(),
        task_template: TaskSpec {
            container_spec,
            placement: task.placement.map(|p| Placement {
                constraints: p.constraints.unwrap_or_default(),
            }),
            force_update: task.force_update,
        },
        mode,
        networks,
        endpoint_spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> DockerError {
        DockerError::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(classify(server_error(404, "no such service"), "db").is_not_found());
        assert!(classify(server_error(409, "name conflicts"), "db").is_conflict());
        assert!(matches!(
            classify(server_error(500, "boom"), "db"),
            FleetError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_classify_stale_update() {
        let err = classify_update(
            server_error(500, "rpc error: update out of sequence"),
            "db",
            ServiceVersion { index: 7 },
        );
        assert!(matches!(err, FleetError::StaleVersion { version: 7, .. }));
    }

    #[test]
    fn test_spec_conversion_keeps_fields() {
        let spec = ServiceSpec {
            name: "guildserver-redis".to_string(),
            task_template: TaskSpec {
                container_spec: Some(TaskContainer {
                    image: "redis:7".to_string(),
                    mounts: vec![Mount::volume("redis-data-volume", "/data")],
                    ..Default::default()
                }),
                placement: Some(Placement {
                    constraints: vec!["node.role==manager".to_string()],
                }),
                force_update: Some(3),
                ..Default::default()
            },
            networks: vec![NetworkAttachmentConfig::new("guildserver-network")],
            endpoint_spec: Some(EndpointSpec {
                ports: vec![PortConfig::tcp(6379, 6379, PublishMode::Host)],
            }),
            ..Default::default()
        };

        let back = spec_from_engine(spec_to_engine(&spec));
        assert_eq!(back, spec);
    }

    #[test]
    fn test_networks_attach_through_task_template() {
        let spec = ServiceSpec {
            name: "guildserver-postgres".to_string(),
            networks: vec![NetworkAttachmentConfig::new("guildserver-network")],
            ..Default::default()
        };

        let engine = spec_to_engine(&spec);
        assert!(engine.networks.is_none());
        let attached = engine
            .task_template
            .as_ref()
            .and_then(|t| t.networks.as_ref())
            .unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].target.as_deref(), Some("guildserver-network"));
    }

    #[test]
    fn test_legacy_service_networks_are_read() {
        let engine = models::ServiceSpec {
            name: Some("guildserver-redis".to_string()),
            networks: Some(vec![models::NetworkAttachmentConfig {
                target: Some("guildserver-network".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let spec = spec_from_engine(engine);
        assert_eq!(spec.networks, vec![NetworkAttachmentConfig::new("guildserver-network")]);
    }

    #[test]
    fn test_container_config() {
        let spec = ContainerSpec {
            name: "guildserver-monitoring".to_string(),
            image: "guildserver/monitoring:latest".to_string(),
            env: vec!["METRICS_CONFIG={}".to_string()],
            binds: vec!["/proc:/host/proc:ro".to_string()],
            ports: vec![4500],
            network_mode: Some("host".to_string()),
            restart_policy: RestartPolicy::Always,
        };
        let config = container_to_engine(&spec);
        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("host"));
        assert!(host.port_bindings.unwrap().contains_key("4500/tcp"));
        assert!(config.exposed_ports.unwrap().contains_key("4500/tcp"));
    }
}

//! In-memory control plane for tests

use super::{ClusterApi, ContainerApi, ContainerSpec, ImageApi, ServiceApi};
use crate::error::{FleetError, Result};
use crate::swarm::{Service, ServiceSpec, ServiceVersion};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    services: HashMap<String, Service>,
    swarm_active: bool,
    networks: HashSet<String>,
    containers: HashMap<String, (ContainerSpec, bool)>,
    ops: Vec<String>,
    injected: HashMap<&'static str, fn() -> FleetError>,
}

/// Versioned fake engine with one-shot failure injection per operation
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `op` with `error`
    pub fn inject(&self, op: &'static str, error: fn() -> FleetError) {
        self.state.lock().unwrap().injected.insert(op, error);
    }

    /// Make `name` exist without going through `create_service`
    pub fn seed_service(&self, spec: ServiceSpec) {
        let mut state = self.state.lock().unwrap();
        state.services.insert(
            spec.name.clone(),
            Service {
                id: format!("svc-{}", spec.name),
                version: ServiceVersion { index: 1 },
                spec,
            },
        );
    }

    pub fn seed_container(&self, spec: ContainerSpec) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(spec.name.clone(), (spec, true));
    }

    pub fn set_swarm_active(&self, active: bool) {
        self.state.lock().unwrap().swarm_active = active;
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.state.lock().unwrap().services.get(name).cloned()
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().unwrap().services.len()
    }

    pub fn swarm_active(&self) -> bool {
        self.state.lock().unwrap().swarm_active
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state.lock().unwrap().networks.contains(name)
    }

    /// Container definition and whether it is running
    pub fn container(&self, name: &str) -> Option<(ContainerSpec, bool)> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    /// Every call made, e.g. `pull redis:7` or `create_service db`
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    fn enter(&self, op: &'static str, subject: &str) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("{} {}", op, subject));
        match state.injected.remove(op) {
            Some(error) => Err(error()),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl ImageApi for FakeEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.enter("pull", image)?;
        Ok(())
    }
}

#[async_trait]
impl ServiceApi for FakeEngine {
    async fn inspect_service(&self, name: &str) -> Result<Service> {
        let state = self.enter("inspect_service", name)?;
        state
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("service {}", name)))
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        let mut state = self.enter("create_service", &spec.name)?;
        if state.services.contains_key(&spec.name) {
            return Err(FleetError::Conflict(format!("service {} already exists", spec.name)));
        }
        state.services.insert(
            spec.name.clone(),
            Service {
                id: format!("svc-{}", spec.name),
                version: ServiceVersion { index: 1 },
                spec: spec.clone(),
            },
        );
        Ok(())
    }

    async fn update_service(&self, name: &str, version: ServiceVersion, spec: &ServiceSpec) -> Result<()> {
        let mut state = self.enter("update_service", name)?;
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| FleetError::NotFound(format!("service {}", name)))?;
        if service.version != version {
            return Err(FleetError::StaleVersion {
                name: name.to_string(),
                version: version.index,
                message: "update out of sequence".to_string(),
            });
        }
        service.spec = spec.clone();
        service.version.index += 1;
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for FakeEngine {
    async fn inspect_swarm(&self) -> Result<()> {
        let state = self.enter("inspect_swarm", "")?;
        if state.swarm_active {
            Ok(())
        } else {
            Err(FleetError::Api {
                status: 503,
                message: "This node is not a swarm manager".to_string(),
            })
        }
    }

    async fn init_swarm(&self, advertise_addr: &str, _listen_addr: &str) -> Result<()> {
        let mut state = self.enter("init_swarm", advertise_addr)?;
        state.swarm_active = true;
        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> Result<()> {
        let state = self.enter("inspect_network", name)?;
        if state.networks.contains(name) {
            Ok(())
        } else {
            Err(FleetError::NotFound(format!("network {}", name)))
        }
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let mut state = self.enter("create_network", name)?;
        if !state.networks.insert(name.to_string()) {
            return Err(FleetError::Conflict(format!("network {} already exists", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerApi for FakeEngine {
    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.enter("remove_container", name)?;
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FleetError::NotFound(format!("container {}", name)))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let mut state = self.enter("create_container", &spec.name)?;
        if state.containers.contains_key(&spec.name) {
            return Err(FleetError::Conflict(format!("container {} already exists", spec.name)));
        }
        state.containers.insert(spec.name.clone(), (spec.clone(), false));
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.enter("start_container", name)?;
        match state.containers.get_mut(name) {
            Some((_, running)) => {
                *running = true;
                Ok(())
            }
            None => Err(FleetError::NotFound(format!("container {}", name))),
        }
    }
}

//! Idempotent create-or-update of named services
//!
//! The service name is the idempotency key. No lock is held across the
//! pull, inspect and write calls; two reconcilers racing on the same name
//! are made safe by treating a create conflict as a benign race.

use super::service::{Service, ServiceSpec};
use crate::control::ServiceApi;
use crate::error::Result;
use tracing::{debug, info, warn};

/// Which path reconciliation took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    /// Another actor created the service between inspect and create
    Skipped,
}

/// Produces the final settings from the live service and the desired spec
pub type MergeHook = dyn Fn(&Service, ServiceSpec) -> ServiceSpec + Send + Sync;

/// Reconciles one service definition against the control plane
pub struct ServiceReconciler<'a, A: ServiceApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: ServiceApi + ?Sized> ServiceReconciler<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Ensure a service named `spec.name` exists and matches `spec`.
    ///
    /// A pull failure aborts before the control plane is touched. A stale
    /// version on update propagates as [`FleetError::StaleVersion`](crate::error::FleetError::StaleVersion).
    pub async fn ensure(&self, image: &str, spec: ServiceSpec, merge: Option<&MergeHook>) -> Result<ReconcileOutcome> {
        let name = spec.name.clone();

        self.api.pull_image(image).await?;
        debug!("Pulled {} for service {}", image, name);

        match self.api.inspect_service(&name).await {
            Ok(live) => {
                let version = live.version;
                let settings = match merge {
                    Some(merge) => merge(&live, spec),
                    None => spec,
                };
                self.api.update_service(&name, version, &settings).await?;
                info!("Service {} updated (version {})", name, version.index);
                Ok(ReconcileOutcome::Updated)
            }
            Err(err) if err.is_not_found() => match self.api.create_service(&spec).await {
                Ok(()) => {
                    info!("Service {} created", name);
                    Ok(ReconcileOutcome::Created)
                }
                Err(err) if err.is_conflict() => {
                    warn!("Service {} was created concurrently, skipping", name);
                    Ok(ReconcileOutcome::Skipped)
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}

/// Convenience wrapper around [`ServiceReconciler::ensure`]
pub async fn ensure_service<A: ServiceApi + ?Sized>(
    api: &A,
    image: &str,
    spec: ServiceSpec,
    merge: Option<&MergeHook>,
) -> Result<ReconcileOutcome> {
    ServiceReconciler::new(api).ensure(image, spec, merge).await
}

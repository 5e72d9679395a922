//! # Sync
//!
//! One synchronization cycle:
//!
//! 1. list Services and keep those carrying the expose annotation
//! 2. collect the ready Pods of each and build listeners and clusters
//! 3. compare the result with the last applied snapshot
//! 4. if it differs, bump the major version, publish it to the snapshot cache
//!    and remember it as last applied
//!
//! Cycles are serialized by the mutex around the last applied snapshot. Any
//! error aborts the cycle before anything is published.

use crate::constants::INITIAL_SNAPSHOT_VERSION;
use crate::controller::pods::ready_pods;
use crate::controller::{ResourceLister, SyncError};
use crate::observability::metrics;
use crate::xds::{EnvoyPorts, Snapshot, SnapshotBuilder, SnapshotCache, SnapshotVersion};
use k8s_openapi::api::core::v1::Service;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Node id the snapshot is published under
    pub node_id: String,
    /// Annotation that must be `"true"` for a Service to be exposed
    pub expose_annotation_key: String,
    pub envoy_ports: EnvoyPorts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Desired configuration equals the last applied snapshot
    Unchanged,
    /// A new snapshot with this version was published
    Published(String),
}

pub struct Synchronizer<L> {
    lister: L,
    cache: Arc<SnapshotCache>,
    options: SyncOptions,
    last_applied: Mutex<Snapshot>,
}

impl<L> std::fmt::Debug for Synchronizer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<L: ResourceLister> Synchronizer<L> {
    pub fn new(lister: L, cache: Arc<SnapshotCache>, options: SyncOptions) -> Self {
        Self {
            lister,
            cache,
            options,
            last_applied: Mutex::new(Snapshot::empty(INITIAL_SNAPSHOT_VERSION)),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Version of the last applied snapshot
    pub async fn last_applied_version(&self) -> String {
        self.last_applied.lock().await.version().to_string()
    }

    /// Run one sync cycle.
    ///
    /// # Errors
    ///
    /// - `SyncError::ListFailed` if Services or Pods cannot be listed
    /// - `SyncError::UnsupportedServiceType` if an exposed Service is not a NodePort
    /// - `SyncError::Xds` if the built snapshot is inconsistent
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let start = Instant::now();
        metrics::increment_syncs();

        let result = self.sync_locked().await;

        metrics::observe_sync_duration(start.elapsed().as_secs_f64());
        result
    }

    async fn sync_locked(&self) -> Result<SyncOutcome, SyncError> {
        let mut last_applied = self.last_applied.lock().await;

        let services = self.lister.services().await?;
        let mut builder = SnapshotBuilder::new(self.options.envoy_ports);

        for service in &services {
            if !is_exposed(service, &self.options.expose_annotation_key) {
                continue;
            }
            let key = service_key(service);

            let service_type = service.spec.as_ref().and_then(|spec| spec.type_.clone());
            if service_type.as_deref() != Some("NodePort") {
                warn!(
                    service = key.as_str(),
                    service_type = ?service_type,
                    "exposed service is not of type NodePort, aborting sync"
                );
                return Err(SyncError::UnsupportedServiceType {
                    service: key,
                    service_type,
                });
            }

            let pods = ready_pods(service.as_ref(), &self.lister).await?;
            if pods.is_empty() {
                debug!(service = key.as_str(), "skipping service without ready pods");
                continue;
            }

            builder.add_service(service, &pods);
        }

        let exposed_services = builder.exposed_services();
        let candidate = builder.build(last_applied.version());
        if candidate == *last_applied {
            debug!(
                version = last_applied.version(),
                "configuration unchanged, not publishing"
            );
            return Ok(SyncOutcome::Unchanged);
        }

        let previous: SnapshotVersion = last_applied.version().parse()?;
        let next = previous.next_major();
        let snapshot = candidate.with_version(next.to_string());
        snapshot.consistent()?;

        self.cache
            .set_snapshot(&self.options.node_id, snapshot.clone());

        info!(
            version = snapshot.version(),
            node = self.options.node_id.as_str(),
            listeners = snapshot.listeners().len(),
            clusters = snapshot.clusters().len(),
            exposed_services,
            "published new snapshot"
        );
        metrics::increment_snapshots_published();
        metrics::set_snapshot_version(next.major);
        metrics::set_exposed_services(exposed_services);

        let version = snapshot.version().to_string();
        *last_applied = snapshot;
        Ok(SyncOutcome::Published(version))
    }
}

fn is_exposed(service: &Service, annotation_key: &str) -> bool {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(annotation_key))
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.metadata.namespace.as_deref().unwrap_or_default(),
        service.metadata.name.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(annotations: &str) -> Service {
        serde_yaml::from_str(&format!(
            r"
metadata:
  name: svc1
  namespace: ns
  annotations: {annotations}
spec:
  type: NodePort
"
        ))
        .unwrap()
    }

    #[test]
    fn test_is_exposed_is_case_insensitive() {
        let key = "nodeport-proxy.k8s.io/expose";
        assert!(is_exposed(&service("{nodeport-proxy.k8s.io/expose: 'true'}"), key));
        assert!(is_exposed(&service("{nodeport-proxy.k8s.io/expose: 'TRUE'}"), key));
        assert!(!is_exposed(&service("{nodeport-proxy.k8s.io/expose: 'yes'}"), key));
        assert!(!is_exposed(&service("{other: 'true'}"), key));
        assert!(!is_exposed(&service("{}"), key));
    }

    #[test]
    fn test_service_key() {
        assert_eq!(service_key(&service("{}")), "ns/svc1");
    }
}

//! # Lister
//!
//! Read access to the Services and Pods a sync cycle works from.
//!
//! In the running controller the data comes from reflector stores kept up to
//! date by the watch loop. `StaticLister` holds a replaceable set of objects
//! for tests.

use crate::controller::SyncError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::reflector::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// All Services visible to the controller
    async fn services(&self) -> Result<Vec<Arc<Service>>, SyncError>;

    /// All Pods in `namespace`
    async fn pods(&self, namespace: &str) -> Result<Vec<Arc<Pod>>, SyncError>;
}

/// Lister backed by reflector stores
#[derive(Clone)]
pub struct StoreLister {
    services: Store<Service>,
    pods: Store<Pod>,
    ready_timeout: Duration,
}

impl std::fmt::Debug for StoreLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLister")
            .field("services", &self.services.len())
            .field("pods", &self.pods.len())
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}

impl StoreLister {
    /// `ready_timeout` bounds the wait for the initial list of each store.
    pub fn new(services: Store<Service>, pods: Store<Pod>, ready_timeout: Duration) -> Self {
        Self {
            services,
            pods,
            ready_timeout,
        }
    }
}

/// Wait until `store` has completed its initial list.
///
/// An empty store before the initial list would look like "nothing exposed",
/// so listing fails instead of returning it.
async fn wait_ready<K>(store: &Store<K>, kind: &'static str, timeout: Duration) -> Result<(), SyncError>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Eq + std::hash::Hash + Clone,
{
    match tokio::time::timeout(timeout, store.wait_until_ready()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SyncError::ListFailed {
            kind,
            reason: e.to_string(),
        }),
        Err(_) => Err(SyncError::ListFailed {
            kind,
            reason: format!("initial list did not complete within {timeout:?}"),
        }),
    }
}

#[async_trait]
impl ResourceLister for StoreLister {
    async fn services(&self) -> Result<Vec<Arc<Service>>, SyncError> {
        wait_ready(&self.services, "services", self.ready_timeout).await?;
        Ok(self.services.state())
    }

    async fn pods(&self, namespace: &str) -> Result<Vec<Arc<Pod>>, SyncError> {
        wait_ready(&self.pods, "pods", self.ready_timeout).await?;
        Ok(self
            .pods
            .state()
            .into_iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }
}

/// In-memory lister over a replaceable set of objects
///
/// Listing either kind can be switched to fail.
#[derive(Debug, Default)]
pub struct StaticLister {
    objects: RwLock<(Vec<Arc<Service>>, Vec<Arc<Pod>>)>,
    fail_services: AtomicBool,
    fail_pods: AtomicBool,
}

impl StaticLister {
    pub fn new(services: Vec<Service>, pods: Vec<Pod>) -> Self {
        let lister = Self::default();
        lister.replace(services, pods);
        lister
    }

    /// Replace every object the lister returns
    pub fn replace(&self, services: Vec<Service>, pods: Vec<Pod>) {
        let objects = (
            services.into_iter().map(Arc::new).collect(),
            pods.into_iter().map(Arc::new).collect(),
        );
        match self.objects.write() {
            Ok(mut guard) => *guard = objects,
            Err(poisoned) => *poisoned.into_inner() = objects,
        }
    }

    pub fn set_fail_services(&self, fail: bool) {
        self.fail_services.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_pods(&self, fail: bool) {
        self.fail_pods.store(fail, Ordering::Relaxed);
    }

    fn read(
        &self,
        kind: &'static str,
        fail: &AtomicBool,
    ) -> Result<std::sync::RwLockReadGuard<'_, (Vec<Arc<Service>>, Vec<Arc<Pod>>)>, SyncError> {
        if fail.load(Ordering::Relaxed) {
            return Err(SyncError::ListFailed {
                kind,
                reason: "listing disabled".to_string(),
            });
        }
        self.objects.read().map_err(|e| SyncError::ListFailed {
            kind,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ResourceLister for StaticLister {
    async fn services(&self) -> Result<Vec<Arc<Service>>, SyncError> {
        Ok(self.read("services", &self.fail_services)?.0.clone())
    }

    async fn pods(&self, namespace: &str) -> Result<Vec<Arc<Pod>>, SyncError> {
        Ok(self
            .read("pods", &self.fail_pods)?
            .1
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl<L: ResourceLister + ?Sized> ResourceLister for Arc<L> {
    async fn services(&self) -> Result<Vec<Arc<Service>>, SyncError> {
        (**self).services().await
    }

    async fn pods(&self, namespace: &str) -> Result<Vec<Arc<Pod>>, SyncError> {
        (**self).pods(namespace).await
    }
}

//! # Watch Loop
//!
//! Runs a sync cycle whenever a Service or Pod changes.
//!
//! Services and Pods are mirrored into reflector stores the synchronizer lists
//! from. Their watch events are fed into a `kube::runtime::Controller` keyed by
//! Namespace: every event schedules its object's namespace, the controller
//! collapses pending duplicates, and each reconcile runs one full sync. The
//! namespace outlives the objects in it, so deletions trigger a sync as well.
//! Reconciles run one at a time, failed syncs are requeued with exponential
//! backoff, and shutdown waits for the running sync.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::{ResourceLister, StoreLister, SyncError, SyncOptions, SyncOutcome, Synchronizer};
use crate::runtime::error_policy::{error_policy, handle_watch_error};
use crate::server::ServerState;
use crate::xds::SnapshotCache;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Client, Resource};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};

/// State shared by reconciles and the error policy
pub struct SyncContext<L> {
    synchronizer: Synchronizer<L>,
    backoff: Mutex<ExponentialBackoff>,
    server_state: Arc<ServerState>,
}

impl<L> std::fmt::Debug for SyncContext<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("synchronizer", &self.synchronizer)
            .finish_non_exhaustive()
    }
}

impl<L: ResourceLister> SyncContext<L> {
    pub fn new(
        synchronizer: Synchronizer<L>,
        backoff: ExponentialBackoff,
        server_state: Arc<ServerState>,
    ) -> Self {
        Self {
            synchronizer,
            backoff: Mutex::new(backoff),
            server_state,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer<L> {
        &self.synchronizer
    }

    /// Run `f` on the shared retry backoff.
    pub fn with_backoff<T>(&self, f: impl FnOnce(&mut ExponentialBackoff) -> T) -> T {
        let mut backoff = match self.backoff.lock() {
            Ok(backoff) => backoff,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut backoff)
    }
}

/// Reconcile one namespace key by running a full sync.
///
/// The key only schedules the work; the snapshot always covers every exposed
/// Service.
///
/// # Errors
///
/// Any `SyncError` of the cycle. The error policy requeues the key.
pub async fn reconcile<L: ResourceLister>(
    namespace: Arc<Namespace>,
    ctx: Arc<SyncContext<L>>,
) -> Result<Action, SyncError> {
    let key = namespace.metadata.name.as_deref().unwrap_or_default();
    let outcome = ctx.synchronizer.sync().await?;

    ctx.with_backoff(ExponentialBackoff::reset);
    ctx.server_state.set_ready(true);

    match outcome {
        SyncOutcome::Published(version) => {
            debug!(trigger = key, version = version.as_str(), "sync published a new snapshot");
        }
        SyncOutcome::Unchanged => {
            trace!(trigger = key, "sync found no changes");
        }
    }
    Ok(Action::await_change())
}

/// Namespace key scheduled for an event on `object`
pub fn trigger_key<K: Resource>(object: &K) -> Option<ObjectRef<Namespace>> {
    object
        .meta()
        .namespace
        .as_deref()
        .map(ObjectRef::<Namespace>::new)
}

/// Objects touched by watch events, with watch errors logged and dropped.
///
/// The watchers restart themselves with their own backoff.
fn touched_objects<K, S>(kind: &'static str, events: S) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: Send + 'static,
    S: Stream<Item = Result<K, watcher::Error>> + Send + 'static,
{
    events.filter_map(move |event| async move {
        match event {
            Ok(object) => Some(Ok(object)),
            Err(e) => {
                handle_watch_error(kind, &e.to_string());
                None
            }
        }
    })
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn log_reconcile_result(
    result: Result<(ObjectRef<Namespace>, Action), controller::Error<SyncError, watcher::Error>>,
) {
    match result {
        Ok((key, _)) => trace!(trigger = %key, "sync completed"),
        Err(controller::Error::ReconcilerFailed(e, key)) => {
            debug!(trigger = %key, error = %e, "sync failed, requeued with backoff");
        }
        Err(controller::Error::QueueError(e)) => {
            handle_watch_error("namespaces", &e.to_string());
        }
        Err(controller::Error::ObjectNotFound(key)) => {
            debug!(trigger = %key, "namespace no longer exists, skipping");
        }
        Err(e) => warn!("Controller error: {}", e),
    }
}

/// Run the watch loop until SIGINT or SIGTERM.
pub async fn run_watch_loop(
    client: Client,
    namespace: Option<String>,
    options: SyncOptions,
    cache: Arc<SnapshotCache>,
    config: ControllerConfig,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let namespace = namespace.as_deref();
    info!(
        namespace = namespace.unwrap_or("<all>"),
        "Starting watch loop..."
    );

    let (service_store, service_writer) = reflector::store::<Service>();
    let (pod_store, pod_writer) = reflector::store::<Pod>();

    let service_events = touched_objects(
        "services",
        reflector(
            service_writer,
            watcher(scoped_api::<Service>(&client, namespace), watcher::Config::default())
                .default_backoff(),
        )
        .touched_objects(),
    );
    let pod_events = touched_objects(
        "pods",
        reflector(
            pod_writer,
            watcher(scoped_api::<Pod>(&client, namespace), watcher::Config::default())
                .default_backoff(),
        )
        .touched_objects(),
    );

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace_config = match namespace {
        Some(namespace) => watcher::Config::default().fields(&format!("metadata.name={namespace}")),
        None => watcher::Config::default(),
    };

    let synchronizer = Synchronizer::new(
        StoreLister::new(service_store, pod_store, config.list_timeout()),
        cache,
        options,
    );
    let context = Arc::new(SyncContext::new(synchronizer, config.backoff(), server_state));

    Controller::new(namespaces, namespace_config)
        .with_config(controller::Config::default().concurrency(1))
        .watches_stream(service_events, |service: Service| trigger_key(&service))
        .watches_stream(pod_events, |pod: Pod| trigger_key(&pod))
        .shutdown_on_signal()
        .run(reconcile::<StoreLister>, error_policy::<StoreLister>, Arc::clone(&context))
        .for_each(|result| async move { log_reconcile_result(result) })
        .await;

    info!(
        version = context.synchronizer().last_applied_version().await.as_str(),
        "Watch loop stopped gracefully"
    );
    Ok(())
}

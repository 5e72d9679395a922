//! # xDS Server
//!
//! State-of-the-world gRPC discovery services backed by the [`SnapshotCache`].
//!
//! ADS and the per-type CDS/LDS/EDS/RDS services share the same stream
//! handling. Every Envoy connecting is served the snapshot stored under the
//! configured node id, regardless of the node it reports.
//!
//! Per stream and per type URL the server remembers the last nonce and
//! version it sent:
//!
//! - a request carrying an older nonce is stale and ignored
//! - a request with `error_detail` set is a NACK; it is logged and counted,
//!   and nothing is resent until the next snapshot
//! - otherwise a response is sent when the client's version or the last sent
//!   version differs from the current snapshot
//!
//! Delta xDS is not supported.

use crate::observability::metrics;
use crate::xds::{type_url, Snapshot, SnapshotCache};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};
use uuid::Uuid;
use xds_api::pb::envoy::service::{
    cluster::v3::cluster_discovery_service_server::{
        ClusterDiscoveryService, ClusterDiscoveryServiceServer,
    },
    discovery::v3::{
        aggregated_discovery_service_server::{
            AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
        },
        DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
    },
    endpoint::v3::endpoint_discovery_service_server::{
        EndpointDiscoveryService, EndpointDiscoveryServiceServer,
    },
    listener::v3::listener_discovery_service_server::{
        ListenerDiscoveryService, ListenerDiscoveryServiceServer,
    },
    route::v3::route_discovery_service_server::{
        RouteDiscoveryService, RouteDiscoveryServiceServer,
    },
};

/// Buffered responses per stream before the writer task waits on the client
const STREAM_BUFFER: usize = 16;

type ResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;
type DeltaResponseStream = ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

#[derive(Debug, Clone)]
pub struct XdsServer {
    cache: Arc<SnapshotCache>,
    node_id: Arc<str>,
}

impl XdsServer {
    pub fn new(cache: Arc<SnapshotCache>, node_id: &str) -> Self {
        Self {
            cache,
            node_id: Arc::from(node_id),
        }
    }

    /// gRPC router with all discovery services registered.
    ///
    /// Callers pick how to serve it (`serve_with_shutdown` on an address, or
    /// `serve_with_incoming_shutdown` on an existing listener).
    pub fn into_router(self) -> tonic::transport::server::Router {
        tonic::transport::Server::builder()
            .add_service(AggregatedDiscoveryServiceServer::new(self.clone()))
            .add_service(ClusterDiscoveryServiceServer::new(self.clone()))
            .add_service(ListenerDiscoveryServiceServer::new(self.clone()))
            .add_service(EndpointDiscoveryServiceServer::new(self.clone()))
            .add_service(RouteDiscoveryServiceServer::new(self))
    }

    /// Spawn the task serving one discovery stream.
    ///
    /// `default_type` is used for requests that leave `type_url` empty, which
    /// the per-type services allow. ADS passes `None`.
    pub fn spawn_stream<S>(&self, requests: S, default_type: Option<&'static str>) -> ResponseStream
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let snapshots = self.cache.watch(&self.node_id);
        tokio::spawn(run_stream(requests, snapshots, tx, default_type));
        ReceiverStream::new(rx)
    }

    fn open_stream(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
        default_type: Option<&'static str>,
    ) -> ResponseStream {
        info!(
            remote = ?request.remote_addr(),
            type_url = default_type.unwrap_or("ads"),
            node = self.node_id.as_ref(),
            "xDS stream opened"
        );
        self.spawn_stream(request.into_inner(), default_type)
    }

    fn fetch(
        &self,
        request: Request<DiscoveryRequest>,
        default_type: &'static str,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        let request = request.into_inner();
        let type_url = if request.type_url.is_empty() {
            default_type
        } else {
            request.type_url.as_str()
        };

        let snapshot = self
            .cache
            .snapshot(&self.node_id)
            .ok_or_else(|| Status::unavailable("no snapshot has been published yet"))?;

        let response = build_response(&snapshot, type_url, &request.resource_names);
        metrics::increment_xds_responses(type_url);
        Ok(Response::new(response))
    }
}

#[derive(Debug, Default)]
struct Subscription {
    resource_names: Vec<String>,
    nonce: Option<String>,
    sent_version: Option<String>,
}

impl Subscription {
    fn needs_update(&self, snapshot: &Snapshot) -> bool {
        self.sent_version.as_deref() != Some(snapshot.version())
    }
}

fn build_response(snapshot: &Snapshot, type_url: &str, names: &[String]) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: snapshot.version().to_string(),
        resources: snapshot.resources(type_url, names),
        type_url: type_url.to_string(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

/// Send the current snapshot for `type_url` and record what was sent.
///
/// Returns `false` once the client has gone away.
async fn respond(
    tx: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    type_url: &str,
    subscription: &mut Subscription,
    snapshot: &Snapshot,
) -> bool {
    let response = build_response(snapshot, type_url, &subscription.resource_names);
    debug!(
        type_url,
        version = response.version_info.as_str(),
        nonce = response.nonce.as_str(),
        resources = response.resources.len(),
        "sending discovery response"
    );

    subscription.nonce = Some(response.nonce.clone());
    subscription.sent_version = Some(response.version_info.clone());
    metrics::increment_xds_responses(type_url);

    tx.send(Ok(response)).await.is_ok()
}

async fn run_stream<S>(
    mut requests: S,
    mut snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    tx: mpsc::Sender<Result<DiscoveryResponse, Status>>,
    default_type: Option<&'static str>,
) where
    S: Stream<Item = Result<DiscoveryRequest, Status>> + Unpin,
{
    metrics::inc_xds_streams_active();
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    loop {
        tokio::select! {
            request = requests.next() => {
                let request = match request {
                    Some(Ok(request)) => request,
                    Some(Err(status)) => {
                        debug!(error = %status, "xDS stream receive error");
                        break;
                    }
                    None => break,
                };

                let type_url = match (request.type_url.as_str(), default_type) {
                    ("", Some(default_type)) => default_type.to_string(),
                    ("", None) => {
                        // Nothing can be reported back if the client already went away.
                        let _ = tx
                            .send(Err(Status::invalid_argument("type_url is required on ADS streams")))
                            .await;
                        break;
                    }
                    (type_url, _) => type_url.to_string(),
                };

                let subscription = subscriptions.entry(type_url.clone()).or_default();

                if !request.response_nonce.is_empty()
                    && subscription.nonce.as_deref() != Some(request.response_nonce.as_str())
                {
                    debug!(
                        type_url = type_url.as_str(),
                        nonce = request.response_nonce.as_str(),
                        "ignoring stale discovery request"
                    );
                    continue;
                }

                if let Some(error) = &request.error_detail {
                    warn!(
                        type_url = type_url.as_str(),
                        version = request.version_info.as_str(),
                        code = error.code,
                        message = error.message.as_str(),
                        "Envoy rejected configuration (NACK)"
                    );
                    metrics::increment_xds_nacks(&type_url);
                    subscription.resource_names = request.resource_names;
                    continue;
                }

                let names_changed = subscription.resource_names != request.resource_names;
                subscription.resource_names = request.resource_names;

                let Some(snapshot) = snapshots.borrow().clone() else {
                    debug!(type_url = type_url.as_str(), "no snapshot yet, waiting");
                    continue;
                };

                if names_changed
                    || request.version_info != snapshot.version()
                    || subscription.needs_update(&snapshot)
                {
                    if !respond(&tx, &type_url, subscription, &snapshot).await {
                        break;
                    }
                } else {
                    debug!(
                        type_url = type_url.as_str(),
                        version = snapshot.version(),
                        "client is up to date"
                    );
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                    continue;
                };

                let mut open = true;
                for (type_url, subscription) in &mut subscriptions {
                    if subscription.needs_update(&snapshot)
                        && !respond(&tx, type_url, subscription, &snapshot).await
                    {
                        open = false;
                        break;
                    }
                }
                if !open {
                    break;
                }
            }
            () = tx.closed() => break,
        }
    }

    metrics::dec_xds_streams_active();
    debug!("xDS stream closed");
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for XdsServer {
    type StreamAggregatedResourcesStream = ResponseStream;
    type DeltaAggregatedResourcesStream = DeltaResponseStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        Ok(Response::new(self.open_stream(request, None)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for XdsServer {
    type StreamClustersStream = ResponseStream;
    type DeltaClustersStream = DeltaResponseStream;

    async fn stream_clusters(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamClustersStream>, Status> {
        Ok(Response::new(
            self.open_stream(request, Some(type_url::CLUSTER)),
        ))
    }

    async fn delta_clusters(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaClustersStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, type_url::CLUSTER)
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for XdsServer {
    type StreamListenersStream = ResponseStream;
    type DeltaListenersStream = DeltaResponseStream;

    async fn stream_listeners(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamListenersStream>, Status> {
        Ok(Response::new(
            self.open_stream(request, Some(type_url::LISTENER)),
        ))
    }

    async fn delta_listeners(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaListenersStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, type_url::LISTENER)
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for XdsServer {
    type StreamEndpointsStream = ResponseStream;
    type DeltaEndpointsStream = DeltaResponseStream;

    async fn stream_endpoints(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamEndpointsStream>, Status> {
        Ok(Response::new(
            self.open_stream(request, Some(type_url::ENDPOINT)),
        ))
    }

    async fn delta_endpoints(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaEndpointsStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, type_url::ENDPOINT)
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for XdsServer {
    type StreamRoutesStream = ResponseStream;
    type DeltaRoutesStream = DeltaResponseStream;

    async fn stream_routes(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamRoutesStream>, Status> {
        Ok(Response::new(self.open_stream(request, Some(type_url::ROUTE))))
    }

    async fn delta_routes(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaRoutesStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }

    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, type_url::ROUTE)
    }
}

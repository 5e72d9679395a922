//! # xDS
//!
//! Envoy resources, snapshots and the gRPC discovery services that serve them.
//!
//! - `filters`: TCP proxy and health check filter configs
//! - `resources`: builds listeners and clusters from Services and Pods
//! - `snapshot`: versioned, comparable set of resources
//! - `cache`: latest snapshot per node, with change notification
//! - `server`: ADS/CDS/LDS/EDS/RDS gRPC services

pub mod cache;
pub mod filters;
pub mod resources;
pub mod server;
pub mod snapshot;

pub use cache::SnapshotCache;
pub use resources::{EnvoyPorts, SnapshotBuilder};
pub use server::XdsServer;
pub use snapshot::{Snapshot, SnapshotVersion};

use thiserror::Error;
use xds_api::pb::google::protobuf::{Any, Duration};

/// Type URLs of the resources and typed configs this control plane emits
pub mod type_url {
    pub const CLUSTER: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
    pub const LISTENER: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
    pub const ENDPOINT: &str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
    pub const ROUTE: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

    pub const TCP_PROXY: &str =
        "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
    pub const HTTP_CONNECTION_MANAGER: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
    pub const HEALTH_CHECK: &str =
        "type.googleapis.com/envoy.extensions.filters.http.health_check.v3.HealthCheck";
    pub const ROUTER: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
}

/// Well-known Envoy filter names
pub mod filter_name {
    pub const TCP_PROXY: &str = "envoy.filters.network.tcp_proxy";
    pub const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
    pub const HEALTH_CHECK: &str = "envoy.filters.http.health_check";
    pub const ROUTER: &str = "envoy.filters.http.router";
}

#[derive(Debug, Error)]
pub enum XdsError {
    #[error("listener {listener} references unknown cluster {cluster}")]
    DanglingClusterReference { listener: String, cluster: String },

    #[error("failed to decode typed config {type_url} of listener {listener}: {source}")]
    InvalidTypedConfig {
        listener: String,
        type_url: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("invalid snapshot version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },
}

/// Pack a message into a `google.protobuf.Any` with the given type URL.
pub(crate) fn to_any<M: prost::Message>(type_url: &str, message: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

pub(crate) fn duration_from_millis(millis: u64) -> Duration {
    let seconds = i64::try_from(millis / 1000).unwrap_or(i64::MAX);
    // sub-second remainder is below 1e9 and always fits
    let nanos = i32::try_from((millis % 1000) * 1_000_000).unwrap_or_default();
    Duration { seconds, nanos }
}

//! # Constants
//!
//! Shared constants used throughout the envoy manager.
//!
//! These values represent the defaults of the nodeport-proxy deployment and can
//! be overridden via flags or environment variables where applicable.

/// Annotation that opts a Service into being exposed by the proxy
pub const DEFAULT_EXPOSE_ANNOTATION_KEY: &str = "nodeport-proxy.k8s.io/expose";

/// Default address of the xDS gRPC server
pub const DEFAULT_LISTEN_ADDRESS: &str = ":8001";

/// Default node id every Envoy instance is served under
pub const DEFAULT_ENVOY_NODE_NAME: &str = "kube";

/// Default port of the Envoy admin interface (loopback only)
pub const DEFAULT_ENVOY_ADMIN_PORT: u16 = 9001;

/// Default port of the Envoy listener exposing `/healthz` and `/stats`
pub const DEFAULT_ENVOY_STATS_PORT: u16 = 8002;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8090;

/// Version of the empty snapshot the synchronizer starts from
pub const INITIAL_SNAPSHOT_VERSION: &str = "0.0.0";

/// Connect timeout of the clusters generated for exposed Services (milliseconds)
pub const CLUSTER_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Connect timeout of the admin/stats cluster (milliseconds)
pub const STATS_CLUSTER_CONNECT_TIMEOUT_MS: u64 = 50;

/// Name shared by the admin/stats listener and cluster
pub const STATS_RESOURCE_NAME: &str = "service_stats";

/// Stat prefix of the TCP proxy filters
pub const TCP_PROXY_STAT_PREFIX: &str = "ingress_tcp";

/// Path answered by the Envoy health check filter
pub const HEALTH_CHECK_PATH: &str = "/healthz";

/// Route prefix forwarded to the Envoy admin interface
pub const STATS_ROUTE_PREFIX: &str = "/stats";

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 5;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 1_000_000;

/// Default bound on waiting for the initial list of the Service and Pod stores
pub const DEFAULT_LIST_TIMEOUT_SECS: u64 = 30;

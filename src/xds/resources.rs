//! # Resources
//!
//! Builds the Envoy listeners and clusters for exposed NodePort Services.
//!
//! Every exposed Service port becomes a pair of resources sharing the name
//! `<namespace>/<name>-<nodePort>`:
//!
//! - a `STATIC` cluster whose endpoints are the `podIP:containerPort` pairs of
//!   the ready Pods backing the Service
//! - a listener on `0.0.0.0:<nodePort>` with a TCP proxy filter pointing at
//!   that cluster
//!
//! The admin/stats pair (`service_stats`) is always present so Envoy exposes
//! `/healthz` and `/stats` even when nothing else is exposed.

use crate::constants::{
    CLUSTER_CONNECT_TIMEOUT_MS, HEALTH_CHECK_PATH, STATS_CLUSTER_CONNECT_TIMEOUT_MS,
    STATS_RESOURCE_NAME, STATS_ROUTE_PREFIX, TCP_PROXY_STAT_PREFIX,
};
use crate::controller::pods::resolve_target_port;
use crate::xds::filters::{tcp_proxy::ClusterSpecifier, HealthCheck, TcpProxy};
use crate::xds::{duration_from_millis, filter_name, to_any, type_url, Snapshot};
use k8s_openapi::api::core::v1::{Pod, Service};
use std::sync::Arc;
use tracing::debug;
use xds_api::pb::envoy::{
    config::{
        cluster::v3 as xds_cluster,
        core::v3 as xds_core,
        endpoint::v3 as xds_endpoint,
        listener::v3 as xds_listener,
        route::v3 as xds_route,
    },
    extensions::filters::{
        http::router::v3 as xds_router,
        network::http_connection_manager::v3 as xds_http,
    },
    r#type::matcher::v3 as xds_matcher,
};
use xds_api::pb::google::protobuf::BoolValue;

const ANY_ADDRESS: &str = "0.0.0.0";
const LOOPBACK_ADDRESS: &str = "127.0.0.1";
const STATS_ROUTE_CONFIG_NAME: &str = "local_route";
const STATS_VIRTUAL_HOST_NAME: &str = "backend";

/// Ports of the Envoy instance the snapshot is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvoyPorts {
    /// Envoy admin interface, reachable on loopback only
    pub admin: u32,
    /// Listener exposing `/healthz` and `/stats`
    pub stats: u32,
}

/// Accumulates the resources of a single sync cycle.
#[derive(Debug)]
pub struct SnapshotBuilder {
    listeners: Vec<xds_listener::Listener>,
    clusters: Vec<xds_cluster::Cluster>,
    exposed_services: usize,
}

impl SnapshotBuilder {
    /// Start a builder that already holds the admin/stats resources.
    pub fn new(ports: EnvoyPorts) -> Self {
        Self {
            listeners: vec![stats_listener(ports.stats)],
            clusters: vec![stats_cluster(ports.admin)],
            exposed_services: 0,
        }
    }

    /// Add a cluster and listener for every TCP node port of `service`.
    ///
    /// `pods` must already be filtered down to the ready Pods selected by the
    /// Service. Ports for which no Pod resolves a target port are skipped.
    pub fn add_service(&mut self, service: &Service, pods: &[Arc<Pod>]) {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let ports = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_deref())
            .unwrap_or_default();

        let mut added = false;
        for port in ports {
            let protocol = port.protocol.as_deref().unwrap_or("TCP");
            if protocol != "TCP" {
                debug!(
                    service.namespace = namespace,
                    service.name = name,
                    port = port.port,
                    protocol,
                    "skipping non-TCP service port"
                );
                continue;
            }

            let Some(node_port) = port.node_port.and_then(|p| u32::try_from(p).ok()) else {
                debug!(
                    service.namespace = namespace,
                    service.name = name,
                    port = port.port,
                    "skipping service port without node port"
                );
                continue;
            };
            if node_port == 0 {
                continue;
            }

            let mut endpoints: Vec<(String, u32)> = Vec::with_capacity(pods.len());
            for pod in pods {
                let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
                let target_port = resolve_target_port(port, pod);
                if target_port == 0 {
                    debug!(
                        pod = pod_name,
                        service.namespace = namespace,
                        service.name = name,
                        port = port.port,
                        "pod has no container port matching the service target port"
                    );
                    continue;
                }

                let Some(pod_ip) = pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()) else {
                    debug!(pod = pod_name, "pod has no IP yet");
                    continue;
                };
                endpoints.push((pod_ip.to_string(), target_port));
            }

            if endpoints.is_empty() {
                debug!(
                    service.namespace = namespace,
                    service.name = name,
                    node_port,
                    "no endpoints for node port"
                );
                continue;
            }

            endpoints.sort();
            endpoints.dedup();

            let resource_name = format!("{namespace}/{name}-{node_port}");
            debug!(
                cluster = resource_name.as_str(),
                endpoints = endpoints.len(),
                "adding cluster and listener"
            );
            self.clusters.push(static_cluster(
                &resource_name,
                CLUSTER_CONNECT_TIMEOUT_MS,
                endpoints,
            ));
            self.listeners
                .push(tcp_proxy_listener(&resource_name, node_port, &resource_name));
            added = true;
        }

        if added {
            self.exposed_services += 1;
        }
    }

    /// Number of Services that contributed at least one listener
    pub fn exposed_services(&self) -> usize {
        self.exposed_services
    }

    pub fn build(self, version: impl Into<String>) -> Snapshot {
        Snapshot::new(version, self.listeners, self.clusters)
    }
}

fn socket_address(address: &str, port: u32) -> xds_core::Address {
    use xds_core::address::Address;
    use xds_core::socket_address::{PortSpecifier, Protocol};

    xds_core::Address {
        address: Some(Address::SocketAddress(xds_core::SocketAddress {
            protocol: Protocol::Tcp.into(),
            address: address.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

/// A round-robin `STATIC` cluster over the given `(address, port)` pairs.
pub(crate) fn static_cluster(
    name: &str,
    connect_timeout_ms: u64,
    endpoints: Vec<(String, u32)>,
) -> xds_cluster::Cluster {
    use xds_cluster::cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy};
    use xds_endpoint::lb_endpoint::HostIdentifier;

    let lb_endpoints = endpoints
        .into_iter()
        .map(|(address, port)| xds_endpoint::LbEndpoint {
            host_identifier: Some(HostIdentifier::Endpoint(xds_endpoint::Endpoint {
                address: Some(socket_address(&address, port)),
                ..Default::default()
            })),
            ..Default::default()
        })
        .collect();

    xds_cluster::Cluster {
        name: name.to_string(),
        connect_timeout: Some(duration_from_millis(connect_timeout_ms)),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Static.into())),
        lb_policy: LbPolicy::RoundRobin.into(),
        load_assignment: Some(xds_endpoint::ClusterLoadAssignment {
            cluster_name: name.to_string(),
            endpoints: vec![xds_endpoint::LocalityLbEndpoints {
                lb_endpoints,
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A listener on `0.0.0.0:port` proxying raw TCP to `cluster`.
pub(crate) fn tcp_proxy_listener(name: &str, port: u32, cluster: &str) -> xds_listener::Listener {
    use xds_listener::filter::ConfigType;

    let tcp_proxy = TcpProxy {
        stat_prefix: TCP_PROXY_STAT_PREFIX.to_string(),
        cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.to_string())),
    };

    xds_listener::Listener {
        name: name.to_string(),
        address: Some(socket_address(ANY_ADDRESS, port)),
        filter_chains: vec![xds_listener::FilterChain {
            filters: vec![xds_listener::Filter {
                name: filter_name::TCP_PROXY.to_string(),
                config_type: Some(ConfigType::TypedConfig(to_any(
                    type_url::TCP_PROXY,
                    &tcp_proxy,
                ))),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn stats_cluster(admin_port: u32) -> xds_cluster::Cluster {
    static_cluster(
        STATS_RESOURCE_NAME,
        STATS_CLUSTER_CONNECT_TIMEOUT_MS,
        vec![(LOOPBACK_ADDRESS.to_string(), admin_port)],
    )
}

fn stats_listener(stats_port: u32) -> xds_listener::Listener {
    use xds_http::http_connection_manager::{CodecType, RouteSpecifier};
    use xds_http::http_filter::ConfigType as HttpFilterConfigType;
    use xds_listener::filter::ConfigType;
    use xds_matcher::string_matcher::MatchPattern;
    use xds_route::header_matcher::HeaderMatchSpecifier;
    use xds_route::route::Action;
    use xds_route::route_action::ClusterSpecifier as RouteCluster;
    use xds_route::route_match::PathSpecifier;

    let health_check = HealthCheck {
        pass_through_mode: Some(BoolValue { value: false }),
        headers: vec![xds_route::HeaderMatcher {
            name: ":path".to_string(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(
                xds_matcher::StringMatcher {
                    match_pattern: Some(MatchPattern::Exact(HEALTH_CHECK_PATH.to_string())),
                    ..Default::default()
                },
            )),
            ..Default::default()
        }],
    };

    let stats_route = xds_route::Route {
        r#match: Some(xds_route::RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix(STATS_ROUTE_PREFIX.to_string())),
            ..Default::default()
        }),
        action: Some(Action::Route(xds_route::RouteAction {
            cluster_specifier: Some(RouteCluster::Cluster(STATS_RESOURCE_NAME.to_string())),
            ..Default::default()
        })),
        ..Default::default()
    };

    let conn_manager = xds_http::HttpConnectionManager {
        codec_type: CodecType::Auto.into(),
        stat_prefix: STATS_RESOURCE_NAME.to_string(),
        route_specifier: Some(RouteSpecifier::RouteConfig(xds_route::RouteConfiguration {
            name: STATS_ROUTE_CONFIG_NAME.to_string(),
            virtual_hosts: vec![xds_route::VirtualHost {
                name: STATS_VIRTUAL_HOST_NAME.to_string(),
                domains: vec!["*".to_string()],
                routes: vec![stats_route],
                ..Default::default()
            }],
            ..Default::default()
        })),
        http_filters: vec![
            xds_http::HttpFilter {
                name: filter_name::HEALTH_CHECK.to_string(),
                config_type: Some(HttpFilterConfigType::TypedConfig(to_any(
                    type_url::HEALTH_CHECK,
                    &health_check,
                ))),
                ..Default::default()
            },
            xds_http::HttpFilter {
                name: filter_name::ROUTER.to_string(),
                config_type: Some(HttpFilterConfigType::TypedConfig(to_any(
                    type_url::ROUTER,
                    &xds_router::Router::default(),
                ))),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    xds_listener::Listener {
        name: STATS_RESOURCE_NAME.to_string(),
        address: Some(socket_address(ANY_ADDRESS, stats_port)),
        filter_chains: vec![xds_listener::FilterChain {
            filters: vec![xds_listener::Filter {
                name: filter_name::HTTP_CONNECTION_MANAGER.to_string(),
                config_type: Some(ConfigType::TypedConfig(to_any(
                    type_url::HTTP_CONNECTION_MANAGER,
                    &conn_manager,
                ))),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

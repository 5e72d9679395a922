//! # Filter Configs
//!
//! Envoy filter configurations the `xds-api` crate does not generate.
//!
//! Only the fields this control plane sets are declared. Tags match
//! `envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy` and
//! `envoy.extensions.filters.http.health_check.v3.HealthCheck`, so the packed
//! `Any` is decoded by Envoy as the upstream message.

use xds_api::pb::envoy::config::route::v3::HeaderMatcher;
use xds_api::pb::google::protobuf::BoolValue;

/// TCP proxy network filter
#[derive(Clone, PartialEq, prost::Message)]
pub struct TcpProxy {
    /// Prefix of the statistics emitted by the filter
    #[prost(string, tag = "1")]
    pub stat_prefix: String,
    #[prost(oneof = "tcp_proxy::ClusterSpecifier", tags = "2")]
    pub cluster_specifier: Option<tcp_proxy::ClusterSpecifier>,
}

pub mod tcp_proxy {
    /// Upstream the filter connects to
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum ClusterSpecifier {
        #[prost(string, tag = "2")]
        Cluster(String),
    }
}

/// Health check HTTP filter
#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheck {
    /// When false, the filter answers health checks itself
    #[prost(message, optional, tag = "1")]
    pub pass_through_mode: Option<BoolValue>,
    /// Requests matching all headers are treated as health checks
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<HeaderMatcher>,
}

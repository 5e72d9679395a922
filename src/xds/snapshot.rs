//! # Snapshot
//!
//! A versioned set of Envoy listeners and clusters.
//!
//! Snapshots are plain values: they are rebuilt from scratch on every sync and
//! compared structurally against the last applied one. Resources are keyed by
//! name in ordered maps so two builds from the same input compare equal.

use crate::xds::filters::{tcp_proxy::ClusterSpecifier, TcpProxy};
use crate::xds::{type_url, XdsError};
use prost::Message;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use xds_api::pb::envoy::config::{cluster::v3::Cluster, listener::v3::Listener};
use xds_api::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};
use xds_api::pb::envoy::config::listener::v3::filter::ConfigType;
use xds_api::pb::envoy::config::route::v3::{route::Action, route_action};
use xds_api::pb::google::protobuf::Any;

/// Semantic version of a snapshot (`MAJOR.MINOR.PATCH`)
///
/// Only the major component is ever bumped by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SnapshotVersion {
    /// Next major version, with minor and patch reset
    #[must_use]
    pub fn next_major(self) -> Self {
        Self {
            major: self.major + 1,
            minor: 0,
            patch: 0,
        }
    }
}

impl FromStr for SnapshotVersion {
    type Err = XdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| XdsError::InvalidVersion {
            version: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.trim().splitn(3, '.');
        let mut next = |name: &str| -> Result<u64, XdsError> {
            parts
                .next()
                .ok_or_else(|| invalid(&format!("missing {name} component")))?
                .parse::<u64>()
                .map_err(|e| invalid(&format!("{name} component: {e}")))
        };

        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        })
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    version: String,
    listeners: BTreeMap<String, Listener>,
    clusters: BTreeMap<String, Cluster>,
}

impl Snapshot {
    pub fn new(
        version: impl Into<String>,
        listeners: impl IntoIterator<Item = Listener>,
        clusters: impl IntoIterator<Item = Cluster>,
    ) -> Self {
        Self {
            version: version.into(),
            listeners: listeners
                .into_iter()
                .map(|l| (l.name.clone(), l))
                .collect(),
            clusters: clusters.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Empty snapshot carrying only a version
    pub fn empty(version: impl Into<String>) -> Self {
        Self::new(version, [], [])
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Same resources under a different version
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn listeners(&self) -> &BTreeMap<String, Listener> {
        &self.listeners
    }

    pub fn clusters(&self) -> &BTreeMap<String, Cluster> {
        &self.clusters
    }

    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.get(name)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.get(name)
    }

    /// Resources of the given type, packed for a discovery response.
    ///
    /// An empty `names` list subscribes to every resource of the type.
    /// Endpoints and routes are always inlined, so those types are empty.
    pub fn resources(&self, resource_type: &str, names: &[String]) -> Vec<Any> {
        let wanted = |name: &String| names.is_empty() || names.contains(name);
        match resource_type {
            type_url::LISTENER => self
                .listeners
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(_, l)| super::to_any(type_url::LISTENER, l))
                .collect(),
            type_url::CLUSTER => self
                .clusters
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(_, c)| super::to_any(type_url::CLUSTER, c))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Check that every cluster referenced by a listener exists.
    ///
    /// # Errors
    ///
    /// Returns `XdsError::DanglingClusterReference` for the first missing
    /// cluster, or `XdsError::InvalidTypedConfig` if a filter config cannot
    /// be decoded.
    pub fn consistent(&self) -> Result<(), XdsError> {
        for (name, listener) in &self.listeners {
            for cluster in referenced_clusters(name, listener)? {
                if !self.clusters.contains_key(&cluster) {
                    return Err(XdsError::DanglingClusterReference {
                        listener: name.clone(),
                        cluster,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            version: self.version.clone(),
            listeners: self.listeners.keys().cloned().collect(),
            clusters: self.clusters.keys().cloned().collect(),
        }
    }
}

/// Names and version of a snapshot, for the debug endpoint and logs
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub version: String,
    pub listeners: Vec<String>,
    pub clusters: Vec<String>,
}

/// Clusters referenced by the TCP proxy and HTTP connection manager filters
/// of a listener.
fn referenced_clusters(name: &str, listener: &Listener) -> Result<Vec<String>, XdsError> {
    let mut clusters = Vec::new();

    let typed_configs = listener
        .filter_chains
        .iter()
        .flat_map(|fc| fc.filters.iter())
        .filter_map(|f| match &f.config_type {
            Some(ConfigType::TypedConfig(any)) => Some(any),
            _ => None,
        });

    for any in typed_configs {
        let decode_err = |source| XdsError::InvalidTypedConfig {
            listener: name.to_string(),
            type_url: any.type_url.clone(),
            source,
        };

        match any.type_url.as_str() {
            type_url::TCP_PROXY => {
                let proxy = TcpProxy::decode(any.value.as_slice()).map_err(decode_err)?;
                if let Some(ClusterSpecifier::Cluster(cluster)) = proxy.cluster_specifier {
                    clusters.push(cluster);
                }
            }
            type_url::HTTP_CONNECTION_MANAGER => {
                let hcm =
                    HttpConnectionManager::decode(any.value.as_slice()).map_err(decode_err)?;
                if let Some(RouteSpecifier::RouteConfig(rc)) = hcm.route_specifier {
                    let routed = rc
                        .virtual_hosts
                        .into_iter()
                        .flat_map(|vh| vh.routes)
                        .filter_map(|route| match route.action {
                            Some(Action::Route(action)) => action.cluster_specifier,
                            _ => None,
                        })
                        .filter_map(|specifier| match specifier {
                            route_action::ClusterSpecifier::Cluster(cluster) => Some(cluster),
                            _ => None,
                        });
                    clusters.extend(routed);
                }
            }
            _ => {}
        }
    }

    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::resources::{static_cluster, tcp_proxy_listener};

    #[test]
    fn test_version_parse_and_display() {
        let v: SnapshotVersion = "3.1.4".parse().unwrap();
        assert_eq!(
            v,
            SnapshotVersion {
                major: 3,
                minor: 1,
                patch: 4
            }
        );
        assert_eq!(v.to_string(), "3.1.4");
    }

    #[test]
    fn test_version_next_major_resets_minor_and_patch() {
        let v: SnapshotVersion = "3.1.4".parse().unwrap();
        assert_eq!(v.next_major().to_string(), "4.0.0");
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!(matches!(
            "".parse::<SnapshotVersion>(),
            Err(XdsError::InvalidVersion { .. })
        ));
        assert!(matches!(
            "1.2".parse::<SnapshotVersion>(),
            Err(XdsError::InvalidVersion { .. })
        ));
        assert!(matches!(
            "v1.0.0".parse::<SnapshotVersion>(),
            Err(XdsError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = static_cluster("a", 1000, Vec::new());
        let b = static_cluster("b", 1000, Vec::new());

        let s1 = Snapshot::new("1.0.0", [], [a.clone(), b.clone()]);
        let s2 = Snapshot::new("1.0.0", [], [b, a]);
        assert_eq!(s1, s2);
        assert_ne!(s1, s2.with_version("2.0.0"));
    }

    #[test]
    fn test_consistent_detects_dangling_cluster() {
        let listener = tcp_proxy_listener("ns/svc-30000", 30000, "ns/svc-30000");
        let snapshot = Snapshot::new("1.0.0", [listener.clone()], []);

        match snapshot.consistent() {
            Err(XdsError::DanglingClusterReference { listener, cluster }) => {
                assert_eq!(listener, "ns/svc-30000");
                assert_eq!(cluster, "ns/svc-30000");
            }
            other => panic!("expected dangling reference, got {other:?}"),
        }

        let cluster = static_cluster("ns/svc-30000", 1000, Vec::new());
        let snapshot = Snapshot::new("1.0.0", [listener], [cluster]);
        assert!(snapshot.consistent().is_ok());
    }

    #[test]
    fn test_resources_filters_by_name() {
        let snapshot = Snapshot::new(
            "1.0.0",
            [],
            [
                static_cluster("a", 1000, Vec::new()),
                static_cluster("b", 1000, Vec::new()),
            ],
        );

        assert_eq!(snapshot.resources(type_url::CLUSTER, &[]).len(), 2);
        assert_eq!(
            snapshot
                .resources(type_url::CLUSTER, &["b".to_string()])
                .len(),
            1
        );
        assert!(snapshot.resources(type_url::ENDPOINT, &[]).is_empty());
    }
}

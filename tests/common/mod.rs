//! Common test utilities for the sync and xDS integration tests
//!
//! Provides YAML fixtures for Services and Pods and helpers to read the
//! addresses back out of the generated Envoy resources.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use k8s_openapi::api::core::v1::{Pod, Service};
use nodeport_proxy::controller::SyncOptions;
use nodeport_proxy::xds::EnvoyPorts;
use xds_api::pb::envoy::config::{
    cluster::v3::Cluster,
    core::v3::{address::Address, socket_address::PortSpecifier},
    endpoint::v3::lb_endpoint::HostIdentifier,
    listener::v3::Listener,
};

pub const NODE: &str = "kube";
pub const EXPOSE_ANNOTATION: &str = "nodeport-proxy.k8s.io/expose";

pub fn sync_options() -> SyncOptions {
    SyncOptions {
        node_id: NODE.to_string(),
        expose_annotation_key: EXPOSE_ANNOTATION.to_string(),
        envoy_ports: EnvoyPorts {
            admin: 9001,
            stats: 8002,
        },
    }
}

/// An exposed NodePort Service `ns/<name>` selecting `app: <name>`
pub fn nodeport_service(name: &str, target_port: &str, node_port: u16) -> Service {
    service_yaml(&format!(
        r"
metadata:
  name: {name}
  namespace: ns
  annotations:
    {EXPOSE_ANNOTATION}: 'true'
spec:
  type: NodePort
  selector:
    app: {name}
  ports:
    - name: http
      port: 80
      targetPort: {target_port}
      nodePort: {node_port}
      protocol: TCP
"
    ))
}

pub fn service_yaml(yaml: &str) -> Service {
    serde_yaml::from_str(yaml).expect("valid service fixture")
}

/// A Pod `ns/<name>` labelled `app: <app>` with a container port `http`
pub fn pod(name: &str, app: &str, ip: &str, container_port: u16, ready: bool) -> Pod {
    let ready = if ready { "True" } else { "False" };
    serde_yaml::from_str(&format!(
        r"
metadata:
  name: {name}
  namespace: ns
  labels:
    app: {app}
spec:
  containers:
    - name: app
      ports:
        - name: http
          containerPort: {container_port}
status:
  podIP: {ip}
  conditions:
    - type: Ready
      status: '{ready}'
"
    ))
    .expect("valid pod fixture")
}

/// `(address, port)` pairs of every endpoint of `cluster`
pub fn cluster_endpoints(cluster: &Cluster) -> Vec<(String, u32)> {
    cluster
        .load_assignment
        .iter()
        .flat_map(|la| la.endpoints.iter())
        .flat_map(|locality| locality.lb_endpoints.iter())
        .filter_map(|lb| match &lb.host_identifier {
            Some(HostIdentifier::Endpoint(ep)) => ep.address.as_ref(),
            _ => None,
        })
        .filter_map(|address| socket(address.address.as_ref()))
        .collect()
}

/// `(address, port)` the listener binds to
pub fn listener_address(listener: &Listener) -> Option<(String, u32)> {
    listener
        .address
        .as_ref()
        .and_then(|address| socket(address.address.as_ref()))
}

fn socket(address: Option<&Address>) -> Option<(String, u32)> {
    match address {
        Some(Address::SocketAddress(sa)) => match sa.port_specifier {
            Some(PortSpecifier::PortValue(port)) => Some((sa.address.clone(), port)),
            _ => None,
        },
        _ => None,
    }
}

//! # Pods
//!
//! Selection of the ready Pods backing a Service, and resolution of the
//! container port a Service port targets on each of them.

use crate::controller::{ResourceLister, SyncError};
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::sync::Arc;
use tracing::debug;

/// Ready Pods in the Service's namespace matching every selector label.
///
/// A Service without a selector has no Pods.
///
/// # Errors
///
/// Propagates listing failures from `lister`.
pub async fn ready_pods<L>(service: &Service, lister: &L) -> Result<Vec<Arc<Pod>>, SyncError>
where
    L: ResourceLister + ?Sized,
{
    let Some(selector) = service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .filter(|selector| !selector.is_empty())
    else {
        return Ok(Vec::new());
    };
    let namespace = service.metadata.namespace.as_deref().unwrap_or_default();

    let pods = lister.pods(namespace).await?;
    let total = pods.len();
    let ready: Vec<Arc<Pod>> = pods
        .into_iter()
        .filter(|pod| {
            let labels = pod.metadata.labels.as_ref();
            selector
                .iter()
                .all(|(key, value)| labels.and_then(|l| l.get(key)) == Some(value))
        })
        .filter(|pod| is_ready(pod))
        .collect();

    debug!(
        service.namespace = namespace,
        service.name = service.metadata.name.as_deref().unwrap_or_default(),
        pods.total = total,
        pods.ready = ready.len(),
        "selected ready pods"
    );
    Ok(ready)
}

/// Whether the Pod reports a `Ready` condition with status `True`
pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Container port on `pod` that `port` targets, or `0` when none matches.
///
/// Numeric target ports are returned as is. Named target ports are looked up
/// across all containers of the Pod. A missing target port defaults to the
/// Service port, as the API server would.
pub fn resolve_target_port(port: &ServicePort, pod: &Pod) -> u32 {
    match &port.target_port {
        Some(IntOrString::Int(number)) => u32::try_from(*number).unwrap_or(0),
        Some(IntOrString::String(name)) => pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .flat_map(|container| container.ports.iter().flatten())
            .find(|container_port| container_port.name.as_deref() == Some(name.as_str()))
            .and_then(|container_port| u32::try_from(container_port.container_port).ok())
            .unwrap_or(0),
        None => u32::try_from(port.port).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::lister::StaticLister;

    fn service(yaml: &str) -> Service {
        serde_yaml::from_str(yaml).expect("valid service fixture")
    }

    fn pod(yaml: &str) -> Pod {
        serde_yaml::from_str(yaml).expect("valid pod fixture")
    }

    fn service_port(yaml: &str) -> ServicePort {
        serde_yaml::from_str(yaml).expect("valid service port fixture")
    }

    const SERVICE: &str = r"
metadata:
  name: svc1
  namespace: ns
spec:
  type: NodePort
  selector:
    app: web
";

    fn web_pod(name: &str, namespace: &str, app: &str, ready: &str) -> Pod {
        pod(&format!(
            r"
metadata:
  name: {name}
  namespace: {namespace}
  labels:
    app: {app}
    tier: frontend
spec:
  containers:
    - name: main
      ports:
        - name: http
          containerPort: 8080
    - name: sidecar
      ports:
        - name: metrics
          containerPort: 9090
status:
  podIP: 10.0.0.5
  conditions:
    - type: Ready
      status: '{ready}'
"
        ))
    }

    #[tokio::test]
    async fn test_ready_pods_filters_labels_namespace_and_readiness() {
        let lister = StaticLister::new(
            Vec::new(),
            vec![
                web_pod("ready", "ns", "web", "True"),
                web_pod("not-ready", "ns", "web", "False"),
                web_pod("other-app", "ns", "api", "True"),
                web_pod("other-ns", "elsewhere", "web", "True"),
            ],
        );

        let pods = ready_pods(&service(SERVICE), &lister).await.unwrap();
        let names: Vec<_> = pods
            .iter()
            .map(|p| p.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["ready".to_string()]);
    }

    #[tokio::test]
    async fn test_ready_pods_without_selector_is_empty() {
        let lister = StaticLister::new(Vec::new(), vec![web_pod("ready", "ns", "web", "True")]);
        let svc = service(
            r"
metadata:
  name: svc1
  namespace: ns
spec:
  type: NodePort
",
        );

        assert!(ready_pods(&svc, &lister).await.unwrap().is_empty());
    }

    #[test]
    fn test_is_ready_requires_condition() {
        let no_status = pod(
            r"
metadata:
  name: pending
",
        );
        assert!(!is_ready(&no_status));
        assert!(is_ready(&web_pod("p", "ns", "web", "True")));
        assert!(!is_ready(&web_pod("p", "ns", "web", "Unknown")));
    }

    #[test]
    fn test_resolve_numeric_target_port() {
        let port = service_port("{port: 80, targetPort: 8443}");
        assert_eq!(resolve_target_port(&port, &web_pod("p", "ns", "web", "True")), 8443);
    }

    #[test]
    fn test_resolve_named_target_port_across_containers() {
        let pod = web_pod("p", "ns", "web", "True");

        let http = service_port("{port: 80, targetPort: http}");
        assert_eq!(resolve_target_port(&http, &pod), 8080);

        let metrics = service_port("{port: 9000, targetPort: metrics}");
        assert_eq!(resolve_target_port(&metrics, &pod), 9090);
    }

    #[test]
    fn test_resolve_unknown_named_port_is_zero() {
        let port = service_port("{port: 80, targetPort: grpc}");
        assert_eq!(resolve_target_port(&port, &web_pod("p", "ns", "web", "True")), 0);
    }

    #[test]
    fn test_missing_target_port_defaults_to_service_port() {
        let port = service_port("{port: 6443}");
        assert_eq!(resolve_target_port(&port, &web_pod("p", "ns", "web", "True")), 6443);
    }
}

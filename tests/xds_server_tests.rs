//! # xDS Server Integration Tests
//!
//! Drives an aggregated discovery stream while sync cycles publish snapshots.
//!
//! These tests verify:
//! - An ADS stream receives clusters and listeners of the published snapshot
//! - Acknowledged versions are not resent
//! - A later sync pushes the new version to the open stream

mod common;

use common::{nodeport_service, pod, NODE};
use futures::StreamExt;
use nodeport_proxy::controller::lister::StaticLister;
use nodeport_proxy::controller::Synchronizer;
use nodeport_proxy::xds::{type_url, SnapshotCache, XdsServer};
use prost::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use xds_api::pb::envoy::config::{cluster::v3::Cluster, core::v3::Node, listener::v3::Listener};
use xds_api::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

fn request(type_url: &str, version: &str, nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        node: Some(Node {
            id: "envoy-0".to_string(),
            ..Default::default()
        }),
        version_info: version.to_string(),
        type_url: type_url.to_string(),
        response_nonce: nonce.to_string(),
        ..Default::default()
    }
}

async fn next_response<S>(responses: &mut S) -> DiscoveryResponse
where
    S: futures::Stream<Item = Result<DiscoveryResponse, tonic::Status>> + Unpin,
{
    timeout(Duration::from_secs(5), responses.next())
        .await
        .expect("response within timeout")
        .expect("stream open")
        .expect("ok response")
}

fn names<M: Message + Default>(response: &DiscoveryResponse, name: impl Fn(M) -> String) -> Vec<String> {
    let mut names: Vec<String> = response
        .resources
        .iter()
        .map(|any| name(M::decode(any.value.as_slice()).expect("decodable resource")))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_ads_stream_follows_published_snapshots() {
    let lister = Arc::new(StaticLister::new(
        vec![nodeport_service("svc1", "8080", 31080)],
        vec![pod("svc1-pod", "svc1", "10.0.0.5", 8080, true)],
    ));
    let cache = Arc::new(SnapshotCache::new());
    let synchronizer = Synchronizer::new(
        Arc::clone(&lister),
        Arc::clone(&cache),
        common::sync_options(),
    );
    synchronizer.sync().await.unwrap();

    let server = XdsServer::new(Arc::clone(&cache), NODE);
    let (requests, request_rx) = mpsc::unbounded_channel();
    let mut responses = server.spawn_stream(UnboundedReceiverStream::new(request_rx), None);

    requests.send(Ok(request(type_url::CLUSTER, "", ""))).unwrap();
    let clusters = next_response(&mut responses).await;
    assert_eq!(clusters.version_info, "1.0.0");
    assert_eq!(clusters.type_url, type_url::CLUSTER);
    assert_eq!(
        names(&clusters, |c: Cluster| c.name),
        vec!["ns/svc1-31080", "service_stats"]
    );

    requests.send(Ok(request(type_url::LISTENER, "", ""))).unwrap();
    let listeners = next_response(&mut responses).await;
    assert_eq!(listeners.version_info, "1.0.0");
    assert_eq!(
        names(&listeners, |l: Listener| l.name),
        vec!["ns/svc1-31080", "service_stats"]
    );

    // ACK both types; nothing is resent
    requests
        .send(Ok(request(type_url::CLUSTER, "1.0.0", &clusters.nonce)))
        .unwrap();
    requests
        .send(Ok(request(type_url::LISTENER, "1.0.0", &listeners.nonce)))
        .unwrap();
    assert!(
        timeout(Duration::from_millis(200), responses.next())
            .await
            .is_err(),
        "acknowledged version was resent"
    );

    lister.replace(Vec::new(), Vec::new());
    synchronizer.sync().await.unwrap();

    let mut pushed = vec![
        next_response(&mut responses).await,
        next_response(&mut responses).await,
    ];
    pushed.sort_by(|a, b| a.type_url.cmp(&b.type_url));
    for response in &pushed {
        assert_eq!(response.version_info, "2.0.0");
    }
    assert_eq!(pushed[0].type_url, type_url::CLUSTER);
    assert_eq!(names(&pushed[0], |c: Cluster| c.name), vec!["service_stats"]);
    assert_eq!(pushed[1].type_url, type_url::LISTENER);
    assert_eq!(names(&pushed[1], |l: Listener| l.name), vec!["service_stats"]);
}

#[tokio::test]
async fn test_ads_request_without_type_url_is_rejected() {
    let cache = Arc::new(SnapshotCache::new());
    let server = XdsServer::new(cache, NODE);
    let (requests, request_rx) = mpsc::unbounded_channel();
    let mut responses = server.spawn_stream(UnboundedReceiverStream::new(request_rx), None);

    requests.send(Ok(request("", "", ""))).unwrap();
    let status = timeout(Duration::from_secs(5), responses.next())
        .await
        .expect("response within timeout")
        .expect("stream open")
        .expect_err("request without type url is an error");
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

//! Reconciler tests against an in-memory cluster

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use storm::cluster::api::ClusterError;
use storm::cluster::fsm::ReleaseState;
use storm::cluster::ports::PortAllocator;
use storm::cluster::{AppDeployer, Reconciler};
use storm::config::settings::ClusterSettings;
use storm::errors::StormError;
use storm::image::ImageTag;
use tokio_test::{assert_err, assert_ok};

use crate::common::fake_cluster::FakeCluster;
use crate::common::{cluster_settings, credentials, POLL_INTERVAL, TEST_NAMESPACE};

fn ports() -> PortAllocator {
    PortAllocator::new("127.0.0.1", Duration::from_millis(200)).with_range(40000..50000)
}

async fn reconciler_with(
    cluster: Arc<FakeCluster>,
    settings: ClusterSettings,
) -> Reconciler<FakeCluster> {
    Reconciler::new(cluster, settings, &credentials())
        .await
        .with_port_allocator(ports())
        .with_poll_interval(POLL_INTERVAL)
}

async fn reconciler(cluster: Arc<FakeCluster>) -> Reconciler<FakeCluster> {
    reconciler_with(cluster, cluster_settings()).await
}

fn tag(app: &str) -> ImageTag {
    ImageTag::new("localhost:5000", app, "abc123")
}

fn container(deployment: &Deployment) -> &Container {
    &deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers[0]
}

fn env_of(container: &Container) -> Vec<(String, String)> {
    container
        .env
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|e| (e.name, e.value.unwrap_or_default()))
        .collect()
}

#[tokio::test]
async fn test_bootstrap_creates_namespace_then_secret() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = reconciler(cluster.clone()).await;

    let report = reconciler.bootstrap_report();
    assert!(!report.is_degraded());

    let state = cluster.state();
    assert_eq!(
        state.calls,
        vec![
            format!("create namespace {}", TEST_NAMESPACE),
            "create secret storm-secret".to_string(),
        ]
    );
    let secret = &state.secrets["storm-secret"];
    assert_eq!(
        secret.type_.as_deref(),
        Some("kubernetes.io/dockerconfigjson")
    );
    let document = &secret.data.as_ref().unwrap()[".dockerconfigjson"].0;
    let document: serde_json::Value = serde_json::from_slice(document).unwrap();
    assert_eq!(document["auths"]["localhost:5000"]["username"], "user");
    assert_eq!(document["auths"]["localhost:5000"]["password"], "pass");
}

#[tokio::test]
async fn test_bootstrap_failure_degrades_but_constructs() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.state().namespace_create_error = Some("namespaces is forbidden".to_string());

    let reconciler = reconciler(cluster.clone()).await;

    let report = reconciler.bootstrap_report();
    assert!(report.is_degraded());
    assert_eq!(report.namespace.error(), Some("namespaces is forbidden"));
    // The secret is still attempted and fails on the missing namespace.
    assert!(!report.pull_secret.is_ok());
    assert!(cluster.state().secrets.is_empty());
}

#[tokio::test]
async fn test_bootstrap_creates_namespace_when_lookup_is_forbidden() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.state().namespace_get_error = Some("cannot get namespaces".to_string());

    let reconciler = reconciler(cluster.clone()).await;

    assert!(!reconciler.bootstrap_report().is_degraded());
    let state = cluster.state();
    assert!(state.namespaces.contains(TEST_NAMESPACE));
    assert_eq!(state.secrets.len(), 1);
}

#[tokio::test]
async fn test_bootstrap_accepts_existing_namespace_it_cannot_read() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    cluster.state().namespace_get_error = Some("cannot get namespaces".to_string());

    let reconciler = reconciler(cluster.clone()).await;

    let report = reconciler.bootstrap_report();
    assert!(report.namespace.is_ok());
    assert!(report.pull_secret.is_ok());
    assert_eq!(
        cluster.state().calls[0],
        format!("create namespace {}", TEST_NAMESPACE)
    );
}

#[tokio::test]
async fn test_bootstrap_accepts_existing_secret() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let first = reconciler(cluster.clone()).await;
    assert!(!first.bootstrap_report().is_degraded());

    let second = reconciler(cluster.clone()).await;
    assert!(!second.bootstrap_report().is_degraded());
    assert_eq!(cluster.state().secrets.len(), 1);
}

#[tokio::test]
async fn test_deploy_creates_service_and_deployment() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let reconciler = reconciler(cluster.clone()).await;
    let envs = BTreeMap::from([("FOO".to_string(), "bar".to_string())]);

    let result = assert_ok!(reconciler.deploy(&tag("test"), "test", &envs, true).await);

    let state = cluster.state();
    let service = &state.services["test"];
    let spec = service.spec.as_ref().unwrap();
    assert_eq!(spec.type_.as_deref(), Some("NodePort"));
    let port = &spec.ports.as_ref().unwrap()[0];
    let Some(IntOrString::Int(target)) = port.target_port.clone() else {
        panic!("service has no integer target port");
    };
    assert_eq!(port.port, target);
    assert_eq!(
        result.address,
        format!("http://localhost:{}", port.node_port.unwrap())
    );

    let deployment = &state.deployments["test"];
    assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(1));
    let container = container(deployment);
    assert_eq!(container.image.as_deref(), Some("localhost:5000/test:abc123"));
    assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
    assert_eq!(
        env_of(container),
        vec![
            ("FOO".to_string(), "bar".to_string()),
            ("PORT".to_string(), target.to_string()),
        ]
    );
    assert_eq!(
        container.ports.as_ref().unwrap()[0].container_port,
        target
    );
    drop(state);

    assert_eq!(reconciler.release_state("test").await, ReleaseState::Present);
}

#[tokio::test]
async fn test_redeploy_deletes_before_creating() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let reconciler = reconciler(cluster.clone()).await;
    let envs = BTreeMap::new();

    assert_ok!(reconciler.deploy(&tag("test"), "test", &envs, true).await);
    assert_ok!(reconciler.deploy(&tag("test"), "test", &envs, true).await);

    let state = cluster.state();
    assert_eq!(state.service_names(), vec!["test".to_string()]);
    assert_eq!(state.deployment_names(), vec!["test".to_string()]);

    let release_calls: Vec<&str> = state
        .calls
        .iter()
        .map(String::as_str)
        .filter(|c| !c.starts_with("create secret"))
        .collect();
    assert_eq!(
        release_calls,
        vec![
            "create service test",
            "create deployment test",
            "delete service test",
            "delete deployment test",
            "create service test",
            "create deployment test",
        ]
    );
}

#[tokio::test]
async fn test_uppercase_names_are_lowercased() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let reconciler = reconciler(cluster.clone()).await;

    assert_ok!(
        reconciler
            .deploy(&tag("FooBar"), "FooBar", &BTreeMap::new(), true)
            .await
    );

    let state = cluster.state();
    assert_eq!(state.service_names(), vec!["foobar".to_string()]);
    assert_eq!(state.deployment_names(), vec!["foobar".to_string()]);
    let labels = state.deployments["foobar"]
        .spec
        .as_ref()
        .unwrap()
        .selector
        .match_labels
        .clone()
        .unwrap();
    assert_eq!(labels["web"], "foobar-service");
}

#[tokio::test]
async fn test_port_conflict_is_retried() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    cluster.state().port_conflicts = 2;
    let reconciler = reconciler(cluster.clone()).await;

    assert_ok!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );

    let state = cluster.state();
    assert_eq!(state.service_create_attempts, 3);
    assert_eq!(state.deployment_names(), vec!["test".to_string()]);
}

#[tokio::test]
async fn test_exhausted_port_conflicts_fail_release() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    cluster.state().port_conflicts = 100;
    let reconciler = reconciler(cluster.clone()).await;

    let err = assert_err!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );
    assert!(matches!(
        err,
        StormError::Cluster(ClusterError::PortConflict(_))
    ));
    assert!(err.to_string().starts_with("gave up after 5 attempts"));

    {
        let state = cluster.state();
        assert_eq!(state.service_create_attempts, 5);
        assert!(state.deployments.is_empty());
    }
    assert_eq!(reconciler.release_state("test").await, ReleaseState::Failed);

    // The next deploy starts over from what the cluster holds.
    cluster.state().port_conflicts = 0;
    assert_ok!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );
    assert_eq!(reconciler.release_state("test").await, ReleaseState::Present);
}

#[tokio::test]
async fn test_concurrent_deploys_leave_one_release() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let reconciler = Arc::new(reconciler(cluster.clone()).await);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                let envs = BTreeMap::from([("RUN".to_string(), i.to_string())]);
                reconciler.deploy(&tag("test"), "test", &envs, true).await
            })
        })
        .collect();
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let state = cluster.state();
    assert_eq!(state.service_names(), vec!["test".to_string()]);
    assert_eq!(state.deployment_names(), vec!["test".to_string()]);
    let creates = state
        .calls
        .iter()
        .filter(|c| c.as_str() == "create deployment test")
        .count();
    assert_eq!(creates, 4);
}

#[tokio::test]
async fn test_redeploy_waits_for_lingering_objects() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let reconciler = reconciler(cluster.clone()).await;

    assert_ok!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );
    cluster.state().linger_gets = 3;
    assert_ok!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );

    let state = cluster.state();
    assert_eq!(state.service_names(), vec!["test".to_string()]);
    assert_eq!(state.deployment_names(), vec!["test".to_string()]);
}

#[tokio::test]
async fn test_delete_timeout_fails_release() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let settings = ClusterSettings {
        delete_timeout_secs: 0,
        ..cluster_settings()
    };
    let reconciler = reconciler_with(cluster.clone(), settings).await;

    assert_ok!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );
    cluster.state().linger_gets = 1_000;

    let err = assert_err!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );
    assert!(matches!(
        err,
        StormError::Cluster(ClusterError::DeleteTimeout { .. })
    ));
    assert_eq!(reconciler.release_state("test").await, ReleaseState::Failed);
}

#[tokio::test]
async fn test_load_balancer_has_no_node_port_address() {
    let cluster = Arc::new(FakeCluster::with_namespace(TEST_NAMESPACE));
    let reconciler = reconciler(cluster.clone()).await;

    let result = assert_ok!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), false)
            .await
    );

    assert_eq!(result.address, "");
    let state = cluster.state();
    let spec = state.services["test"].spec.clone().unwrap();
    assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
}

#[tokio::test]
async fn test_deploy_without_namespace_fails() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.state().namespace_create_error = Some("namespaces is forbidden".to_string());
    let reconciler = reconciler(cluster.clone()).await;

    let err = assert_err!(
        reconciler
            .deploy(&tag("test"), "test", &BTreeMap::new(), true)
            .await
    );
    assert!(err.to_string().contains("not found"));
    assert!(cluster.state().services.is_empty());
}

//! Cluster API abstraction
//!
//! The reconciler talks to the cluster only through [`ClusterApi`], so the
//! delete/create protocol can run against an in-memory cluster in tests.
//! The production implementation is [`crate::cluster::kube::KubeCluster`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use thiserror::Error;

/// Errors emitted by the cluster integration
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server refused the request
    #[error("{message}")]
    Api { code: u16, message: String },

    /// Transport or client-side failure of the [`kube`] client
    #[error("kubernetes client error: {0}")]
    Kube(kube::Error),

    #[error("failed to read log stream: {0}")]
    LogStream(#[from] std::io::Error),

    /// The requested service port is already taken on the cluster
    #[error("service port conflict: {0}")]
    PortConflict(String),

    #[error("no free port found after {0} checks")]
    NoFreePort(u32),

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("timed out waiting for {kind} {name} to be deleted")]
    DeleteTimeout { kind: &'static str, name: String },

    #[error("service {0} has no target port")]
    MissingTargetPort(String),

    #[error("release state error: {0}")]
    InvalidTransition(String),
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ClusterError::Api {
                code: response.code,
                message: response.message,
            },
            other => ClusterError::Kube(other),
        }
    }
}

/// Kubernetes operations used by the reconciler
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, ClusterError>;

    /// Creates a service and returns it as stored by the cluster (with any
    /// allocated node ports filled in).
    ///
    /// Fails with [`ClusterError::PortConflict`] when a requested port is
    /// already allocated.
    async fn create_service(&self, namespace: &str, service: &Service)
        -> Result<Service, ClusterError>;

    /// Deletes a service; succeeds if it does not exist.
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;

    /// Deletes a deployment; succeeds if it does not exist.
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn list_pods(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<Pod>, ClusterError>;

    /// Reads a pod's log stream to completion
    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError>;
}

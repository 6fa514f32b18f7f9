//! Delete-then-create reconciliation of application releases

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::authn::registry::RegistryCredentials;
use crate::cluster::api::{ClusterApi, ClusterError};
use crate::cluster::fsm::{ReleaseEvent, ReleaseFsm, ReleaseState};
use crate::cluster::logs::LogAggregator;
use crate::cluster::ports::PortAllocator;
use crate::cluster::resources::{self, ServiceKind};
use crate::cluster::{AppDeployer, DeploymentResult};
use crate::config::settings::ClusterSettings;
use crate::errors::StormError;
use crate::image::ImageTag;
use crate::sync::keyed::KeyedLocks;

const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of one bootstrap step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "error")]
pub enum StepOutcome {
    Ok,
    Failed(String),
}

impl StepOutcome {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => StepOutcome::Ok,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepOutcome::Ok => None,
            StepOutcome::Failed(e) => Some(e),
        }
    }
}

/// Startup namespace and pull secret checks.
///
/// Failures do not stop the server; deploys may then fail on the missing
/// namespace or image pulls may fail on the missing secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub namespace: StepOutcome,
    pub pull_secret: StepOutcome,
    pub checked_at: DateTime<Utc>,
}

impl BootstrapReport {
    pub fn healthy() -> Self {
        Self {
            namespace: StepOutcome::Ok,
            pull_secret: StepOutcome::Ok,
            checked_at: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.namespace.is_ok() || !self.pull_secret.is_ok()
    }
}

/// Reconciles releases against a cluster
pub struct Reconciler<C: ClusterApi> {
    cluster: Arc<C>,
    settings: ClusterSettings,
    ports: PortAllocator,
    releases: KeyedLocks<ReleaseFsm>,
    logs: LogAggregator<C>,
    bootstrap: BootstrapReport,
    poll_interval: Duration,
}

impl<C: ClusterApi> Reconciler<C> {
    /// Create a reconciler and run the bootstrap steps once
    pub async fn new(
        cluster: Arc<C>,
        settings: ClusterSettings,
        credentials: &RegistryCredentials,
    ) -> Self {
        let mut reconciler = Self {
            ports: PortAllocator::new(settings.port_check_host.clone(), settings.port_check_timeout()),
            logs: LogAggregator::new(cluster.clone(), settings.namespace.clone()),
            releases: KeyedLocks::new(),
            bootstrap: BootstrapReport::healthy(),
            poll_interval: DELETE_POLL_INTERVAL,
            cluster,
            settings,
        };
        reconciler.bootstrap = reconciler.run_bootstrap(credentials).await;
        reconciler
    }

    pub fn with_port_allocator(mut self, ports: PortAllocator) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Last known release state of `app_name`
    pub async fn release_state(&self, app_name: &str) -> ReleaseState {
        let release = self.releases.entry(&app_name.to_lowercase()).await;
        let state = release.lock().await.state().clone();
        state
    }

    async fn run_bootstrap(&self, credentials: &RegistryCredentials) -> BootstrapReport {
        // The secret lives in the namespace, so the namespace goes first.
        let namespace = StepOutcome::from_result(self.ensure_namespace().await);
        if let StepOutcome::Failed(e) = &namespace {
            error!(namespace = %self.settings.namespace, error = %e, "Failed to ensure namespace");
        }

        let pull_secret = StepOutcome::from_result(self.ensure_pull_secret(credentials).await);
        if let StepOutcome::Failed(e) = &pull_secret {
            error!(secret = %self.settings.pull_secret_name, error = %e, "Failed to create pull secret");
        }

        BootstrapReport {
            namespace,
            pull_secret,
            checked_at: Utc::now(),
        }
    }

    async fn ensure_namespace(&self) -> Result<(), ClusterError> {
        let name = &self.settings.namespace;
        match self.cluster.get_namespace(name).await {
            Ok(Some(_)) => {
                debug!(namespace = %name, "Namespace exists");
                return Ok(());
            }
            Ok(None) => {}
            // Tokens scoped to one namespace may not read namespaces at all.
            Err(e) => warn!(namespace = %name, error = %e, "Failed to look up namespace, creating it"),
        }
        match self
            .cluster
            .create_namespace(&resources::build_namespace(name))
            .await
        {
            Ok(()) => {
                info!(namespace = %name, "Created namespace");
                Ok(())
            }
            Err(ClusterError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_pull_secret(&self, credentials: &RegistryCredentials) -> Result<(), StormError> {
        let secret = resources::build_pull_secret(
            &self.settings.namespace,
            &self.settings.pull_secret_name,
            credentials.pull_secret_document()?,
        );
        match self
            .cluster
            .create_secret(&self.settings.namespace, &secret)
            .await
        {
            Ok(()) => {
                info!(secret = %self.settings.pull_secret_name, "Created registry pull secret");
                Ok(())
            }
            Err(ClusterError::AlreadyExists { .. }) => {
                debug!(secret = %self.settings.pull_secret_name, "Pull secret already present");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_release(
        &self,
        release: &mut ReleaseFsm,
        tag: &ImageTag,
        app: &str,
        envs: &BTreeMap<String, String>,
        is_local: bool,
    ) -> Result<DeploymentResult, ClusterError> {
        let namespace = self.settings.namespace.as_str();
        let service = self.cluster.get_service(namespace, app).await?;
        let deployment = self.cluster.get_deployment(namespace, app).await?;
        release.observe(service.is_some() || deployment.is_some());

        if release.state() == &ReleaseState::Present {
            release
                .process(ReleaseEvent::Delete)
                .map_err(ClusterError::InvalidTransition)?;
            if service.is_some() {
                info!(app = %app, "Deleting existing service");
                self.cluster.delete_service(namespace, app).await?;
            }
            if deployment.is_some() {
                info!(app = %app, "Deleting existing deployment");
                self.cluster.delete_deployment(namespace, app).await?;
            }
            self.await_deleted(app).await?;
            release
                .process(ReleaseEvent::Deleted)
                .map_err(ClusterError::InvalidTransition)?;
        }

        release
            .process(ReleaseEvent::Create)
            .map_err(ClusterError::InvalidTransition)?;
        let service = self.create_service(app, ServiceKind::for_cluster(is_local)).await?;
        let port = resources::service_target_port(&service)
            .ok_or_else(|| ClusterError::MissingTargetPort(app.to_string()))?;

        let deployment = resources::build_deployment(
            namespace,
            app,
            tag,
            envs,
            port,
            &self.settings.pull_secret_name,
        );
        self.cluster.create_deployment(namespace, &deployment).await?;
        release
            .process(ReleaseEvent::Created)
            .map_err(ClusterError::InvalidTransition)?;

        let address = resources::node_port_address(&service).unwrap_or_default();
        info!(app = %app, image = %tag, port, address = %address, "Release created");
        Ok(DeploymentResult { address })
    }

    /// Wait until neither object of `app` is visible any more
    async fn await_deleted(&self, app: &str) -> Result<(), ClusterError> {
        let namespace = self.settings.namespace.as_str();
        let deadline = Instant::now() + self.settings.delete_timeout();
        loop {
            let service = self.cluster.get_service(namespace, app).await?;
            let deployment = self.cluster.get_deployment(namespace, app).await?;
            let kind = match (service.is_some(), deployment.is_some()) {
                (false, false) => return Ok(()),
                (true, _) => "service",
                (false, true) => "deployment",
            };
            if Instant::now() >= deadline {
                return Err(ClusterError::DeleteTimeout {
                    kind,
                    name: app.to_string(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Create the service on a fresh port, retrying when the port was taken
    /// between the check and the create
    async fn create_service(&self, app: &str, kind: ServiceKind) -> Result<Service, ClusterError> {
        let namespace = self.settings.namespace.as_str();
        let mut last_conflict = String::new();
        for attempt in 1..=self.settings.max_port_attempts {
            let port = self.ports.allocate().await?;
            let service = resources::build_service(namespace, app, port, kind);
            match self.cluster.create_service(namespace, &service).await {
                Ok(created) => return Ok(created),
                Err(ClusterError::PortConflict(message)) => {
                    warn!(app = %app, port, attempt, "Service port taken, retrying");
                    last_conflict = message;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ClusterError::PortConflict(format!(
            "gave up after {} attempts: {}",
            self.settings.max_port_attempts, last_conflict
        )))
    }
}

#[async_trait]
impl<C: ClusterApi + 'static> AppDeployer for Reconciler<C> {
    async fn deploy(
        &self,
        tag: &ImageTag,
        app_name: &str,
        envs: &BTreeMap<String, String>,
        is_local: bool,
    ) -> Result<DeploymentResult, StormError> {
        let app = app_name.to_lowercase();
        let mut release = self.releases.lock(&app).await;

        let result = self
            .replace_release(&mut release, tag, &app, envs, is_local)
            .await;
        if let Err(e) = &result {
            error!(app = %app, error = %e, "Release failed");
            if release.in_transition() {
                let _ = release.process(ReleaseEvent::Failed(e.to_string()));
            }
        }
        Ok(result?)
    }

    async fn logs(&self, app_name: &str) -> Result<String, StormError> {
        Ok(self.logs.aggregate(app_name).await?)
    }

    fn bootstrap_report(&self) -> BootstrapReport {
        self.bootstrap.clone()
    }
}

//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::authn::registry::RegistryCredentials;
use crate::cluster::kube::KubeCluster;
use crate::cluster::{AppDeployer, Reconciler};
use crate::config::Settings;
use crate::errors::StormError;
use crate::image::docker::DockerImageBuilder;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the control plane until `shutdown_signal` resolves
pub async fn run(
    settings: Arc<Settings>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), StormError> {
    info!("Initializing storm control plane...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), settings.server.shutdown_timeout());

    if let Err(e) = init(&settings, &mut shutdown_manager, shutdown_tx.subscribe()).await {
        error!("Failed to start control plane: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    settings: &Settings,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), StormError> {
    let credentials = RegistryCredentials::new(&settings.registry);

    info!("Connecting to the cluster...");
    let cluster = Arc::new(KubeCluster::try_default().await?);
    let reconciler = Reconciler::new(cluster, settings.cluster.clone(), &credentials).await;

    let report = reconciler.bootstrap_report();
    if report.is_degraded() {
        warn!(
            namespace = ?report.namespace,
            pull_secret = ?report.pull_secret,
            "Cluster bootstrap incomplete, running degraded"
        );
    }

    let images = DockerImageBuilder::new(settings.build.clone(), credentials);

    info!("Initializing HTTP server...");
    let server_state = ServerState::new(
        Arc::new(images),
        Arc::new(reconciler),
        settings.server_auth_token.clone(),
        settings.cluster.local,
    );

    let server_handle = serve(&settings.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    server_handle: Option<JoinHandle<Result<(), StormError>>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            server_handle: None,
        }
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), StormError>>,
    ) -> Result<(), StormError> {
        if self.server_handle.is_some() {
            return Err(StormError::ServerError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), StormError> {
        let _ = self.shutdown_tx.send(());

        let delay = self.max_shutdown_delay;
        match tokio::time::timeout(delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => Err(StormError::ServerError(format!(
                "shutdown timed out after {:?}",
                delay
            ))),
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), StormError> {
        info!("Shutting down storm control plane...");

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| StormError::ServerError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

//! Cluster reconciliation
//!
//! Turns an image tag plus environment into exactly one Service and one
//! Deployment per application name, and reads application logs back out.

pub mod api;
pub mod fsm;
pub mod kube;
pub mod logs;
pub mod ports;
pub mod reconciler;
pub mod resources;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StormError;
use crate::image::ImageTag;

pub use reconciler::{BootstrapReport, Reconciler, StepOutcome};

/// Outcome of a successful deploy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// `http://localhost:{nodePort}` when a node port was allocated, else empty
    pub address: String,
}

/// Deployer trait for testability
#[async_trait]
pub trait AppDeployer: Send + Sync {
    /// Replace whatever runs under `app_name` with `tag`
    async fn deploy(
        &self,
        tag: &ImageTag,
        app_name: &str,
        envs: &BTreeMap<String, String>,
        is_local: bool,
    ) -> Result<DeploymentResult, StormError>;

    /// Logs of every pod belonging to `app_name`
    async fn logs(&self, app_name: &str) -> Result<String, StormError>;

    /// Result of the startup namespace and pull secret checks
    fn bootstrap_report(&self) -> BootstrapReport;
}

//! Server state

use std::sync::Arc;

use crate::cluster::AppDeployer;
use crate::config::SecretValue;
use crate::image::ImageBuilder;

/// Server state shared across handlers
pub struct ServerState {
    pub images: Arc<dyn ImageBuilder>,
    pub deployer: Arc<dyn AppDeployer>,
    pub server_token: SecretValue,
    /// Expose services as NodePort (local cluster) or LoadBalancer
    pub is_local: bool,
}

impl ServerState {
    pub fn new(
        images: Arc<dyn ImageBuilder>,
        deployer: Arc<dyn AppDeployer>,
        server_token: SecretValue,
        is_local: bool,
    ) -> Self {
        Self {
            images,
            deployer,
            server_token,
            is_local,
        }
    }
}

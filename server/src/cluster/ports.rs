//! Service port allocation

use std::ops::Range;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tracing::debug;

use crate::cluster::api::ClusterError;

/// Ports handed out to services; port 0 is never a valid service port
pub const PORT_RANGE: Range<u16> = 1..60000;

const DEFAULT_MAX_CHECKS: u32 = 64;

/// Picks random ports and keeps the first one nothing answers on.
///
/// The check is advisory: the port may be taken between the check and the
/// service create, which the reconciler handles by retrying.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: String,
    timeout: Duration,
    range: Range<u16>,
    max_checks: u32,
}

impl PortAllocator {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
            range: PORT_RANGE,
            max_checks: DEFAULT_MAX_CHECKS,
        }
    }

    pub fn with_range(mut self, range: Range<u16>) -> Self {
        self.range = range;
        self
    }

    pub fn with_max_checks(mut self, max_checks: u32) -> Self {
        self.max_checks = max_checks.max(1);
        self
    }

    /// A port is free when connecting to it fails or times out
    pub async fn is_free(&self, port: u16) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), port));
        !matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)))
    }

    pub async fn allocate(&self) -> Result<u16, ClusterError> {
        if self.range.is_empty() {
            return Err(ClusterError::NoFreePort(0));
        }
        for _ in 0..self.max_checks {
            let port = rand::thread_rng().gen_range(self.range.clone());
            if self.is_free(port).await {
                debug!(port, "Allocated service port");
                return Ok(port);
            }
            debug!(port, "Port is in use, trying another");
        }
        Err(ClusterError::NoFreePort(self.max_checks))
    }
}

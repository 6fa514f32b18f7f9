//! Control-plane API models
//!
//! Every reply from the server is an [`ApiResponse`] envelope. Successful
//! replies carry a typed payload in `data`; error replies omit it.

use serde::{Deserialize, Serialize};

/// Header carrying the shared server authentication token
pub const SERVER_AUTH_HEADER: &str = "X-Server-Code";

/// Form field holding the application name on deploy
pub const APP_NAME_FIELD: &str = "app_name";

/// Form field holding the executable on deploy
pub const BINARY_FIELD: &str = "bin";

/// Uniform response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub error: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful reply with a payload
    pub fn success(data: T) -> Self {
        Self {
            error: false,
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<serde_json::Value> {
    /// Error reply without a payload
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Payload of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResponse {
    /// Image reference the cluster pulls
    pub pull_url: String,
    /// Externally reachable address; empty when no node port was resolved
    pub access_url: String,
}

/// Payload of a logs request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: String,
}

/// Payload of the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub service: String,
    pub version: String,
    pub git_hash: String,
    pub degraded: bool,
    pub namespace: BootstrapStep,
    pub pull_secret: BootstrapStep,
}

/// Outcome of one startup bootstrap step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStep {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

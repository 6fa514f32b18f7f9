//! Error types for the Storm control plane

use http::StatusCode;
use thiserror::Error;

use crate::cluster::api::ClusterError;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum StormError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Malformed or incomplete request
    #[error("{0}")]
    Validation(String),

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    Build(String),

    #[error("{0}")]
    Push(String),

    #[error("{0}")]
    Cluster(#[from] ClusterError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StormError {
    /// HTTP status the error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            StormError::Validation(_) => StatusCode::BAD_REQUEST,
            StormError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

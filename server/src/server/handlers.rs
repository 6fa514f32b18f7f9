//! HTTP request handlers

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use storm_api_models::{
    ApiResponse, BootstrapStep, DeployResponse, HealthResponse, LogsResponse, APP_NAME_FIELD,
    BINARY_FIELD,
};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::cluster::StepOutcome;
use crate::errors::StormError;
use crate::models::AppName;
use crate::server::state::ServerState;
use crate::utils::version_info;

const FORM_PARSE_ERROR: &str = "failed to parse http form";
const LOGS_APP_MISSING: &str = "error: app_name is missing";

/// Service name reported by the health endpoint
pub const SERVICE_NAME: &str = "stormd";

fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::failure(message))).into_response()
}

/// Error envelope with the status of the error's taxonomy class
pub fn error_response(err: &StormError) -> Response {
    failure(err.status_code(), err.to_string())
}

/// Uploaded executable, spooled to an anonymous temp file
#[derive(Debug)]
struct Upload {
    file: File,
    len: u64,
}

impl Upload {
    /// Copy a form part to disk chunk by chunk and rewind it for reading.
    ///
    /// The temp file is unlinked on creation and vanishes with the handle.
    async fn spool(mut field: Field<'_>) -> Result<Self, StormError> {
        let spool = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(|e| StormError::Internal(format!("upload spool task failed: {}", e)))??;
        let mut file = File::from_std(spool);

        let mut len = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(form_error)? {
            file.write_all(&chunk).await?;
            len += chunk.len() as u64;
        }
        file.flush().await?;
        file.seek(SeekFrom::Start(0)).await?;

        debug!(bytes = len, "Spooled uploaded binary");
        Ok(Self { file, len })
    }
}

/// Deploy form as received
#[derive(Debug, Default)]
struct DeployForm {
    app_name: Option<String>,
    binary: Option<Upload>,
    envs: BTreeMap<String, String>,
}

impl DeployForm {
    async fn read(mut multipart: Multipart) -> Result<Self, StormError> {
        let mut form = DeployForm::default();
        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let is_file = field.file_name().is_some();
            let has_file_name = field.file_name().is_some_and(|f| !f.is_empty());

            if name == BINARY_FIELD {
                // A part without a file name is not an uploaded file.
                if has_file_name {
                    form.binary = Some(Upload::spool(field).await?);
                }
            } else if name == APP_NAME_FIELD {
                form.app_name = Some(field.text().await.map_err(form_error)?);
            } else if !is_file {
                let value = field.text().await.map_err(form_error)?;
                form.envs.entry(name).or_insert(value);
            }
        }
        Ok(form)
    }

    /// Required fields are checked in order: app name, then binary
    fn into_request(self) -> Result<DeployRequest, StormError> {
        let app = AppName::parse(self.app_name.as_deref().unwrap_or_default())?;
        let binary = self.binary.ok_or_else(|| {
            StormError::Validation(format!(
                "file is missing: no '{}' file part in the form",
                BINARY_FIELD
            ))
        })?;
        Ok(DeployRequest {
            app,
            binary,
            envs: self.envs,
        })
    }
}

fn form_error(err: axum::extract::multipart::MultipartError) -> StormError {
    warn!(error = %err, "Failed to read deploy form");
    StormError::Validation(FORM_PARSE_ERROR.to_string())
}

/// Validated deploy request
struct DeployRequest {
    app: AppName,
    binary: Upload,
    envs: BTreeMap<String, String>,
}

/// Build, push and reconcile
async fn run_deploy(
    state: Arc<ServerState>,
    request: DeployRequest,
) -> Result<DeployResponse, StormError> {
    let DeployRequest { app, binary, envs } = request;
    info!(app = %app, bytes = binary.len, envs = envs.len(), "Deploy requested");

    let tag = state
        .images
        .build(&app.build_dir(), app.as_str(), Box::new(binary.file))
        .await
        .map_err(|e| StormError::Build(format!("failed to build docker image: {}", e)))?;

    state
        .images
        .push(&tag)
        .await
        .map_err(|e| StormError::Push(format!("failed to push image: {}", e)))?;

    let result = state
        .deployer
        .deploy(&tag, app.as_str(), &envs, state.is_local)
        .await?;

    info!(app = %app, image = %tag, address = %result.address, "Deploy finished");
    Ok(DeployResponse {
        pull_url: tag.into_string(),
        access_url: result.address,
    })
}

/// `POST /deploy`
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => {
            warn!(error = %e, "Rejected deploy request body");
            return failure(StatusCode::BAD_REQUEST, FORM_PARSE_ERROR);
        }
    };

    let request = match DeployForm::read(multipart)
        .await
        .and_then(DeployForm::into_request)
    {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    // The pipeline runs to completion even if the client disconnects.
    match tokio::spawn(run_deploy(state, request)).await {
        Ok(Ok(reply)) => success(reply),
        Ok(Err(e)) => {
            warn!(error = %e, "Deploy failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_response(&StormError::Internal(format!("deploy task failed: {}", e))),
    }
}

/// `GET /logs/{app}`
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(app): Path<String>,
) -> Response {
    if app.is_empty() {
        return failure(StatusCode::BAD_REQUEST, LOGS_APP_MISSING);
    }
    let app = match AppName::parse(&app) {
        Ok(app) => app,
        Err(e) => return error_response(&e),
    };

    match state.deployer.logs(app.as_str()).await {
        Ok(logs) => success(LogsResponse { logs }),
        Err(e) => {
            warn!(app = %app, error = %e, "Failed to collect logs");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /logs/` without an application
pub async fn logs_missing_handler() -> Response {
    failure(StatusCode::BAD_REQUEST, LOGS_APP_MISSING)
}

fn bootstrap_step(outcome: &StepOutcome) -> BootstrapStep {
    BootstrapStep {
        ok: outcome.is_ok(),
        error: outcome.error().map(str::to_string),
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> Response {
    let version = version_info();
    let report = state.deployer.bootstrap_report();
    success(HealthResponse {
        service: SERVICE_NAME.to_string(),
        version: version.version,
        git_hash: version.git_hash,
        degraded: report.is_degraded(),
        namespace: bootstrap_step(&report.namespace),
        pull_secret: bootstrap_step(&report.pull_secret),
    })
}

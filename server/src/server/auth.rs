//! Shared-secret request gate

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use storm_api_models::SERVER_AUTH_HEADER;
use tracing::warn;

use crate::errors::StormError;
use crate::server::handlers::error_response;
use crate::server::state::ServerState;

/// Reject any request whose `X-Server-Code` header is not the server token
pub async fn require_server_code(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(SERVER_AUTH_HEADER)
        .map(|value| value.as_bytes());

    match presented {
        Some(code) if tokens_match(code, state.server_token.expose().as_bytes()) => {
            next.run(request).await
        }
        _ => {
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                "Rejected request with missing or wrong server code"
            );
            error_response(&StormError::Forbidden)
        }
    }
}

/// Comparison whose running time does not depend on where the inputs differ
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

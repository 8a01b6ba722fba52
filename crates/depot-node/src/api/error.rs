//! Mapping of service errors onto HTTP responses.

use axum::http::StatusCode;
use depot_core::DepotError;
use tracing::error;

/// Handler result: a status code and the error's display string on failure.
pub type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Status code for `err`. Creation failures take the status of their cause.
pub fn status_for(err: &DepotError) -> StatusCode {
    match err {
        DepotError::NotFound { .. } => StatusCode::NOT_FOUND,
        DepotError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DepotError::Timeout { .. } | DepotError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
        DepotError::OrderCreationFailed { source, .. } => status_for(source),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: DepotError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, err.to_string())
}

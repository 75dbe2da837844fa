// Shared error-to-HTTP-response mapping for the Control API (spec.md
// section 7 / section 6: "Unit creation errors return a precise `{ error:
// string }`"). `everruns-api`'s handlers map errors straight to a bare
// `StatusCode`; the Control API's contract is stricter (every error body is
// JSON), so this wraps `CortexError::kind()` into the one status-code
// policy every route shares instead of duplicating the match arms per
// handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cortex_core::error::{CortexError, ErrorKind};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct ApiError(CortexError);

impl From<CortexError> for ApiError {
    fn from(err: CortexError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::ResourceMissing => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Permanent => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(CortexError::validation(message))
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError(CortexError::resource_missing(message))
}

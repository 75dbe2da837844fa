// Control API: Connections (spec.md section 6, SPEC_FULL.md section 10).
// Full OAuth linking is out of scope (spec.md section 1); this surface only
// persists the `(user_id, provider) -> externalConnectionId` mapping the
// WebhookFront's `ConnectionRegistry` lookup depends on, matching the
// `proxy`/`records`/`action` SaaS-connector facade's own assumption that
// linking happens elsewhere.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use cortex_core::model::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::AuthedUser;
use crate::error_response::{not_found, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<cortex_storage::Store>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConnectionRequest {
    pub provider: String,
    pub connection_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ConnectionsResponse {
    connections: Vec<Connection>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/connections", get(list_connections).post(create_connection))
        .route("/connections/:provider", delete(delete_connection))
        .with_state(state)
}

/// GET /connections -> { connections[] }.
#[utoipa::path(
    get,
    path = "/connections",
    responses(
        (status = 200, description = "Connections for the authenticated user", body = ConnectionsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let connections = state.store.list_connections(user_id).await?;
    Ok(Json(ConnectionsResponse { connections }))
}

/// POST /connections { provider, connection_id } -> 201 { connection }.
#[utoipa::path(
    post,
    path = "/connections",
    request_body = CreateConnectionRequest,
    responses(
        (status = 201, description = "Connection saved", body = Connection),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "connections"
)]
pub async fn create_connection(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(body): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let connection = state
        .store
        .save_connection(user_id, &body.provider, &body.connection_id)
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "connection": connection }))))
}

/// DELETE /connections/:provider -> 200 { success: true }.
#[utoipa::path(
    delete,
    path = "/connections/{provider}",
    params(
        ("provider" = String, Path, description = "Provider key, e.g. 'gmail'")
    ),
    responses(
        (status = 200, description = "Connection removed"),
        (status = 404, description = "No connection for that provider"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(provider): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.delete_connection(user_id, &provider).await?;
    if !deleted {
        return Err(not_found(format!("no connection for provider '{provider}'")));
    }
    Ok(Json(json!({ "success": true })))
}

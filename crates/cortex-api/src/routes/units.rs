// Control API: Unit CRUD (spec.md section 6, SPEC_FULL.md section 10).
// `POST /units` runs the Compiler inline rather than deferring to the
// Dispatcher's worker pools: compiling a prompt is a single request/response
// LLM call made on the caller's behalf, not a background pipeline stage, so
// the caller gets either the compiled Unit or a clarification question
// synchronously in the same response.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Extension, Json, Router};
use cortex_core::model::{Unit, UnitStatus};
use cortex_worker::{ClarificationNeeded, CompileOutcome, Compiler};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthedUser;
use crate::error_response::{bad_request, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<cortex_storage::Store>,
    pub compiler: Arc<Compiler>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUnitRequest {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetUnitStatusRequest {
    pub status: UnitStatus,
}

#[derive(Debug, Serialize, ToSchema)]
struct UnitsResponse {
    units: Vec<Unit>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/units", post(create_unit).get(list_units))
        .route("/units/:id/status", patch(set_unit_status))
        .route("/units/:id", delete(delete_unit))
        .with_state(state)
}

/// POST /units { name, prompt } -> 201 { unit } or 400 { error }.
///
/// A `ClarificationNeeded` compiler outcome is surfaced as a 400 carrying
/// the compiler's question and ambiguity (spec.md section 4.3: "the
/// Compiler surfaces this to the caller rather than guessing"), not
/// silently coerced into a guessed Unit.
#[utoipa::path(
    post,
    path = "/units",
    request_body = CreateUnitRequest,
    responses(
        (status = 201, description = "Unit compiled and saved", body = Unit),
        (status = 400, description = "Invalid prompt or clarification needed"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "units"
)]
pub async fn create_unit(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(body): Json<CreateUnitRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let outcome = state.compiler.compile(user_id, &body.prompt).await?;

    let unit = match outcome {
        CompileOutcome::Unit(unit) => unit,
        CompileOutcome::ClarificationNeeded(ClarificationNeeded { question, ambiguity }) => {
            return Err(bad_request(format!("clarification needed: {question} ({ambiguity})")));
        }
    };

    let saved = state
        .store
        .save_unit(
            user_id,
            &body.name,
            &unit.raw_prompt,
            serde_json::to_value(&unit.trigger).unwrap_or(json!({})),
            serde_json::to_value(&unit.conditions).unwrap_or(json!([])),
            serde_json::to_value(&unit.actions).unwrap_or(json!([])),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "unit": saved }))))
}

/// GET /units -> { units[] }, scoped to the authenticated user.
#[utoipa::path(
    get,
    path = "/units",
    responses(
        (status = 200, description = "Units for the authenticated user", body = UnitsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "units"
)]
pub async fn list_units(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Result<Json<UnitsResponse>, ApiError> {
    let units = state.store.list_units_for_user(user_id).await?;
    Ok(Json(UnitsResponse { units }))
}

/// PATCH /units/:id/status { status } -> 200 { unit }.
#[utoipa::path(
    patch,
    path = "/units/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Unit ID")
    ),
    request_body = SetUnitStatusRequest,
    responses(
        (status = 200, description = "Unit status updated", body = Unit),
        (status = 404, description = "Unit not found"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "units"
)]
pub async fn set_unit_status(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetUnitStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let existing = state
        .store
        .get_unit(id)
        .await?
        .filter(|u| u.user_id == user_id)
        .ok_or_else(|| crate::error_response::not_found(format!("unit {id} not found")))?;
    let _ = existing;

    let updated = state
        .store
        .set_unit_status(id, body.status)
        .await?
        .ok_or_else(|| crate::error_response::not_found(format!("unit {id} not found")))?;

    Ok(Json(json!({ "unit": updated })))
}

/// DELETE /units/:id -> 200 { success: true }.
#[utoipa::path(
    delete,
    path = "/units/{id}",
    params(
        ("id" = Uuid, Path, description = "Unit ID")
    ),
    responses(
        (status = 200, description = "Unit deleted"),
        (status = 404, description = "Unit not found"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "units"
)]
pub async fn delete_unit(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let existing = state
        .store
        .get_unit(id)
        .await?
        .filter(|u| u.user_id == user_id)
        .ok_or_else(|| crate::error_response::not_found(format!("unit {id} not found")))?;
    let _ = existing;

    state.store.delete_unit(id).await?;
    Ok(Json(json!({ "success": true })))
}

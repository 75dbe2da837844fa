// Control API: Run history and rerun (spec.md section 6, SPEC_FULL.md
// section 10). Reruns reset the existing Run row back to `pending` and
// clear its prior steps rather than minting a new Run (the `(unit_id,
// event_id)` unique constraint still holds the identity), then hand it
// straight to the Dispatcher's RuntimePool, bypassing Shaper/Matcher.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use cortex_core::model::{Run, RunStep};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthedUser;
use crate::error_response::{not_found, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<cortex_storage::Store>,
    pub dispatcher: Arc<cortex_worker::Dispatcher>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
struct RunsResponse {
    runs: Vec<Run>,
}

#[derive(Debug, Serialize, ToSchema)]
struct StepsResponse {
    steps: Vec<RunStep>,
}

const DEFAULT_RUNS_LIMIT: i64 = 50;
const MAX_RUNS_LIMIT: i64 = 500;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/runs", get(list_runs))
        .route("/runs/:id/steps", get(list_run_steps))
        .route("/runs/:id/rerun", post(rerun_run))
        .with_state(state)
}

/// GET /runs?limit=N -> { runs[] }, scoped to the authenticated user.
#[utoipa::path(
    get,
    path = "/runs",
    params(
        ("limit" = Option<i64>, Query, description = "Max rows to return (default 50, max 500)")
    ),
    responses(
        (status = 200, description = "Runs for the authenticated user", body = RunsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "runs"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<RunsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
    let runs = state.store.list_runs(user_id, limit).await?;
    Ok(Json(RunsResponse { runs }))
}

/// GET /runs/:id/steps -> { steps[] }.
#[utoipa::path(
    get,
    path = "/runs/{id}/steps",
    params(
        ("id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Steps recorded for the run", body = StepsResponse),
        (status = 404, description = "Run not found"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "runs"
)]
pub async fn list_run_steps(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<StepsResponse>, ApiError> {
    let run = state
        .store
        .get_run(id)
        .await?
        .filter(|r| r.user_id == user_id)
        .ok_or_else(|| not_found(format!("run {id} not found")))?;

    let steps = state.store.list_steps(run.id).await?;
    Ok(Json(StepsResponse { steps }))
}

/// POST /runs/:id/rerun -> 201 { run }. Operators re-drive a Run rather than
/// Runtime auto-resuming a crashed one (spec.md section 4.5: "Runtime never
/// retries a Run itself on crash-restart").
#[utoipa::path(
    post,
    path = "/runs/{id}/rerun",
    params(
        ("id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 201, description = "Run reset and resubmitted to the runtime pool", body = Run),
        (status = 404, description = "Run or its triggering event not found"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "runs"
)]
pub async fn rerun_run(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let existing = state
        .store
        .get_run(id)
        .await?
        .filter(|r| r.user_id == user_id)
        .ok_or_else(|| not_found(format!("run {id} not found")))?;

    let event = state
        .store
        .get_event(existing.event_id)
        .await?
        .ok_or_else(|| not_found(format!("event {} for run {id} not found", existing.event_id)))?;

    let reset = state
        .store
        .reset_run_for_rerun(id)
        .await?
        .ok_or_else(|| not_found(format!("run {id} not found")))?;

    state.dispatcher.rerun(reset.clone(), event).await;

    Ok((StatusCode::CREATED, Json(json!({ "run": reset }))))
}

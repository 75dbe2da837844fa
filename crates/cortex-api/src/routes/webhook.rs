// WebhookFront (spec.md section 4.1, SPEC_FULL.md section 2): the single
// HTTP entry point for provider sync notifications. Validates payload shape
// and provider key, resolves `connectionId -> userId`, enqueues a ShapeTask
// into the Dispatcher, and always ACKs 202 (never 5xx for downstream
// failures — spec.md section 4.1's "provider may legitimately retry").

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router};
use axum::routing::post;
use cortex_worker::shaper::salience;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<cortex_storage::Store>,
    pub dispatcher: Arc<cortex_worker::Dispatcher>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SyncWebhook {
    #[serde(rename = "type")]
    pub kind: String,
    pub connection_id: String,
    pub provider_config_key: String,
    pub model: String,
    #[serde(default)]
    pub sync_name: String,
    #[serde(default)]
    pub response_results: ResponseResults,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ResponseResults {
    #[serde(default)]
    pub added: Vec<Value>,
    #[serde(default)]
    pub updated: Vec<Value>,
    #[serde(default)]
    pub deleted: Vec<Value>,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/webhooks/sync", post(receive_sync)).with_state(state)
}

/// POST /webhooks/sync
///
/// Must return 202 within 200ms of request receipt under nominal load
/// (spec.md section 4.1): all work past shape/provider-key validation is
/// deferred to the Dispatcher.
#[utoipa::path(
    post,
    path = "/webhooks/sync",
    request_body = SyncWebhook,
    responses(
        (status = 202, description = "Accepted for asynchronous processing"),
        (status = 400, description = "Malformed body or unknown provider key")
    ),
    tag = "webhooks"
)]
pub async fn receive_sync(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<StatusCode, StatusCode> {
    let request_id = Uuid::new_v4();
    let _span = tracing::info_span!("webhook_sync", %request_id).entered();

    let payload: SyncWebhook = serde_json::from_slice(&body).map_err(|e| {
        warn!(%request_id, error = %e, "malformed webhook body");
        StatusCode::BAD_REQUEST
    })?;

    let source = salience::source_for_provider_key(&payload.provider_config_key).ok_or_else(|| {
        warn!(%request_id, provider_config_key = %payload.provider_config_key, "unknown provider key");
        StatusCode::BAD_REQUEST
    })?;

    if payload.kind != "sync" {
        info!(%request_id, kind = %payload.kind, "non-sync webhook, acking without work");
        return Ok(StatusCode::ACCEPTED);
    }

    let user_id = match state
        .store
        .lookup_user_id_by_connection(&payload.connection_id, source)
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!(%request_id, connection_id = %payload.connection_id, "no user mapped to connection, acking anyway");
            return Ok(StatusCode::ACCEPTED);
        }
        Err(e) => {
            warn!(%request_id, error = %e, "connection lookup failed, acking anyway");
            return Ok(StatusCode::ACCEPTED);
        }
    };

    state
        .dispatcher
        .enqueue(cortex_worker::ShapeTask {
            user_id,
            source: source.to_string(),
            model: payload.model,
            added: payload.response_results.added,
            updated: payload.response_results.updated,
            deleted: payload.response_results.deleted,
        })
        .await;

    info!(%request_id, %user_id, sync_name = %payload.sync_name, "webhook enqueued");
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_key_has_no_source_mapping() {
        assert!(salience::source_for_provider_key("not-a-real-provider").is_none());
    }

    #[test]
    fn known_provider_key_maps_to_source() {
        assert_eq!(salience::source_for_provider_key("google-mail"), Some("email"));
    }
}

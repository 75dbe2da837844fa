// Cortex API server: the Control API plus the WebhookFront HTTP entry
// point (spec.md section 6, SPEC_FULL.md sections 1/10). Wiring: load
// config, connect the store, build the worker-side components once, then
// merge per-module routers behind a shared tracing/CORS layer.

mod auth;
mod error_response;
mod routes;
mod tool_seed;

use anyhow::{Context, Result};
use axum::middleware;
use axum::{routing::get, Json, Router};
use cortex_core::config::AppConfig;
use cortex_core::model::{Connection, Event, Run, RunStep, Unit, UnitStatus};
use cortex_core::traits::LlmClient;
use cortex_storage::{CachingLlmClient, KvCache, Store};
use cortex_worker::{Compiler, Dispatcher, EventShaper, HttpToolExecutor, Matcher, Runtime};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::webhook::receive_sync,
        routes::units::create_unit,
        routes::units::list_units,
        routes::units::set_unit_status,
        routes::units::delete_unit,
        routes::runs::list_runs,
        routes::runs::list_run_steps,
        routes::runs::rerun_run,
        routes::connections::list_connections,
        routes::connections::create_connection,
        routes::connections::delete_connection,
    ),
    components(
        schemas(
            Unit, UnitStatus,
            Run, RunStep,
            Connection,
            Event,
            routes::webhook::SyncWebhook,
            routes::webhook::ResponseResults,
            routes::units::CreateUnitRequest,
            routes::units::SetUnitStatusRequest,
            routes::runs::ListRunsParams,
            routes::connections::CreateConnectionRequest,
        )
    ),
    tags(
        (name = "webhooks", description = "Provider sync webhook intake"),
        (name = "units", description = "Automation unit CRUD and compilation"),
        (name = "runs", description = "Run history, step inspection, and rerun"),
        (name = "connections", description = "SaaS connection registry"),
    ),
    info(
        title = "Cortex API",
        version = "0.1.0",
        description = "Event-driven SaaS automation engine: webhook intake, compilation, matching, and execution",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

fn build_llm_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>> {
    match config.llm_provider.as_str() {
        "anthropic" => {
            let client = cortex_anthropic::AnthropicClient::from_env()
                .context("failed to construct Anthropic client")?;
            Ok(Arc::new(CachingLlmClient::new(client, Arc::new(KvCache::new()))))
        }
        "openai" | "" => {
            let client = cortex_openai::OpenAiClient::from_env()
                .context("failed to construct OpenAI client")?;
            Ok(Arc::new(CachingLlmClient::new(client, Arc::new(KvCache::new()))))
        }
        other => anyhow::bail!("Unknown LLM_PROVIDER: {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cortex_api=debug,cortex_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("cortex-api starting...");

    let config = Arc::new(AppConfig::from_env().context("failed to load configuration")?);

    let store = Arc::new(
        Store::from_url(&config.store_url).await.context("failed to connect to store")?,
    );
    store.migrate().await.context("failed to run store migrations")?;
    tracing::info!("connected to store and applied migrations");

    let kv_cache = Arc::new(KvCache::new());
    let tools = Arc::new(tool_seed::seeded_registry());

    let llm = build_llm_client(&config)?;
    tracing::info!(provider = %config.llm_provider, "LLM client configured");

    let tool_executor = Arc::new(HttpToolExecutor::new(&config, tools.clone()));

    let shaper = Arc::new(EventShaper::new(kv_cache.clone(), config.clone()));
    let compiler = Arc::new(Compiler::new(llm.clone(), tools.clone(), config.clone()));
    let matcher = Arc::new(Matcher::new(
        store.clone(),
        llm.clone(),
        kv_cache.clone(),
        config.matcher_pool_size,
    ));
    let runtime = Arc::new(Runtime::new(
        store.clone(),
        tools.clone(),
        tool_executor.clone(),
        llm.clone(),
        config.runtime_pool_size,
        config.runtime_wait_max,
    ));

    let dispatcher = Dispatcher::start(
        store.clone(),
        shaper,
        matcher,
        runtime,
        config.shaper_pool_size,
        config.matcher_pool_size,
        config.runtime_pool_size,
    );

    let webhook_state = routes::webhook::AppState { store: store.clone(), dispatcher: dispatcher.clone() };
    let units_state = routes::units::AppState { store: store.clone(), compiler };
    let runs_state = routes::runs::AppState { store: store.clone(), dispatcher: dispatcher.clone() };
    let connections_state = routes::connections::AppState { store: store.clone() };

    let authenticated = Router::new()
        .merge(routes::units::routes(units_state))
        .merge(routes::runs::routes(runs_state))
        .merge(routes::connections::routes(connections_state))
        .layer(middleware::from_fn(auth::require_bearer_user));

    let app = Router::new()
        .route("/health", get(health))
        .merge(routes::webhook::routes(webhook_state))
        .merge(authenticated)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

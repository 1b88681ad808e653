// =============================================================================
// Admin HTTP Surface — Axum 0.7
// =============================================================================
//
// Everything under `/api/v1/config/*` and `/api/v1/strategies/*`, per §4.7 and
// §6. Permissive CORS, a
// public health check, Bearer-authenticated everything else, `{"success":
// true, ...}` / `{"success": false, "error": {...}}` response envelopes in
// place of ad hoc `{"error": ...}` bodies, since this surface
// needs a stable machine-readable error code (`ConfigError::code()`).

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::config::model::ConfigScope;
use crate::config::ConfigManager;
use crate::error::ConfigError;
use crate::strategy::StrategyRegistry;

pub struct AdminState {
    pub config_manager: Arc<ConfigManager>,
    pub strategy_registry: Arc<StrategyRegistry>,
}

pub fn router(state: Arc<AdminState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/config/application", get(get_application_config))
        .route("/api/v1/config/application", post(update_application_config))
        .route("/api/v1/config/application/audit", get(application_audit))
        .route("/api/v1/config/application/cache/refresh", post(refresh_cache))
        .route("/api/v1/strategies", get(list_strategies))
        .route("/api/v1/strategies/:id/config", get(get_strategy_config_global))
        .route("/api/v1/strategies/:id/config", post(update_strategy_config_global))
        .route("/api/v1/strategies/:id/config", delete(delete_strategy_config_global))
        .route("/api/v1/strategies/:id/config/:symbol", get(get_strategy_config_symbol))
        .route("/api/v1/strategies/:id/config/:symbol", post(update_strategy_config_symbol))
        .route("/api/v1/strategies/:id/config/:symbol", delete(delete_strategy_config_symbol))
        .route("/api/v1/strategies/:id/audit", get(strategy_audit))
        .layer(cors)
        .with_state(state)
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok", server_time: chrono::Utc::now().timestamp_millis() })
}

fn ok(data: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "success": true, "data": data })))
}

fn err(e: ConfigError) -> (StatusCode, Json<Value>) {
    let status = match e.code() {
        "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "success": false, "error": { "code": e.code(), "message": e.to_string() } })))
}

#[derive(Deserialize)]
struct PatchRequest {
    patch: Value,
    #[serde(default = "default_changed_by")]
    changed_by: String,
    #[serde(default)]
    reason: String,
}

fn default_changed_by() -> String {
    "unknown".to_string()
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

async fn get_application_config(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
) -> impl IntoResponse {
    let config = state.config_manager.get_application_config().await;
    ok(json!(config))
}

async fn update_application_config(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<PatchRequest>,
) -> impl IntoResponse {
    match state
        .config_manager
        .update_application_config(req.patch, &req.changed_by, &req.reason)
        .await
    {
        Ok(config) => ok(json!(config)),
        Err(e) => err(e),
    }
}

async fn application_audit(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Query(q): Query<AuditQuery>,
) -> impl IntoResponse {
    match state.config_manager.list_audit("application", q.limit).await {
        Ok(records) => ok(json!(records)),
        Err(e) => err(e),
    }
}

async fn refresh_cache(_auth: AuthBearer, State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    state.config_manager.invalidate_cache();
    ok(json!({ "refreshed": true }))
}

async fn list_strategies(_auth: AuthBearer, State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    ok(json!(state.strategy_registry.ids()))
}

async fn get_strategy_config_global(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let config = state.config_manager.get_strategy_config(&id, None).await;
    ok(json!(config))
}

async fn get_strategy_config_symbol(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path((id, symbol)): Path<(String, String)>,
) -> impl IntoResponse {
    let config = state.config_manager.get_strategy_config(&id, Some(&symbol)).await;
    ok(json!(config))
}

async fn update_strategy_config_global(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(req): Json<PatchRequest>,
) -> impl IntoResponse {
    match state
        .config_manager
        .update_strategy_config(&id, ConfigScope::Global, req.patch, &req.changed_by, &req.reason)
        .await
    {
        Ok(config) => ok(json!(config)),
        Err(e) => err(e),
    }
}

async fn update_strategy_config_symbol(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path((id, symbol)): Path<(String, String)>,
    Json(req): Json<PatchRequest>,
) -> impl IntoResponse {
    match state
        .config_manager
        .update_strategy_config(&id, ConfigScope::Symbol(symbol), req.patch, &req.changed_by, &req.reason)
        .await
    {
        Ok(config) => ok(json!(config)),
        Err(e) => err(e),
    }
}

#[derive(Deserialize)]
struct DeleteRequest {
    #[serde(default = "default_changed_by")]
    changed_by: String,
    #[serde(default)]
    reason: String,
}

async fn delete_strategy_config_global(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(req): Json<DeleteRequest>,
) -> impl IntoResponse {
    match state
        .config_manager
        .delete_strategy_config(&id, ConfigScope::Global, &req.changed_by, &req.reason)
        .await
    {
        Ok(()) => ok(json!({ "deleted": true })),
        Err(e) => err(e),
    }
}

async fn delete_strategy_config_symbol(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path((id, symbol)): Path<(String, String)>,
    Json(req): Json<DeleteRequest>,
) -> impl IntoResponse {
    match state
        .config_manager
        .delete_strategy_config(&id, ConfigScope::Symbol(symbol), &req.changed_by, &req.reason)
        .await
    {
        Ok(()) => ok(json!({ "deleted": true })),
        Err(e) => err(e),
    }
}

async fn strategy_audit(
    _auth: AuthBearer,
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Query(q): Query<AuditQuery>,
) -> impl IntoResponse {
    let target = format!("strategy:{id}:global");
    match state.config_manager.list_audit(&target, q.limit).await {
        Ok(records) => ok(json!(records)),
        Err(e) => err(e),
    }
}

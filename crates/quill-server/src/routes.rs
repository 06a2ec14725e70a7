use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use quill_core::conflict::{MergeData, ResolutionOutcome, ResolutionSuggestion};
use quill_core::models::{Conflict, ConflictId, ResolutionType};
use quill_core::sync::SyncStatus;
use quill_core::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedDevice, TokenVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::presence::PresenceRegistry;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Engine,
    pub registry: Arc<PresenceRegistry>,
    pub verifier: TokenVerifier,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: Engine, registry: Arc<PresenceRegistry>) -> Self {
        Self {
            verifier: TokenVerifier::new(Arc::clone(&config)),
            config,
            engine,
            registry,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/conflicts", get(list_conflicts))
        .route("/conflicts/{id}/suggestions", get(conflict_suggestions))
        .route("/conflicts/{id}/resolve", post(resolve_conflict))
        .route("/sync/status", get(sync_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    connections: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        connections: state.registry.connection_count().await,
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let identity = state.verifier.verify_access_token(token)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

async fn list_conflicts(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthenticatedDevice>,
) -> Result<Json<Vec<Conflict>>, AppError> {
    let conflicts = state
        .engine
        .detector
        .get_pending_conflicts(&identity.user_id)
        .await?;
    Ok(Json(conflicts))
}

async fn conflict_suggestions(
    State(state): State<AppState>,
    Extension(_identity): Extension<AuthenticatedDevice>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ResolutionSuggestion>>, AppError> {
    let conflict_id = parse_conflict_id(&id)?;
    let suggestions = state
        .engine
        .resolver
        .get_resolution_suggestions(conflict_id)
        .await?;
    Ok(Json(suggestions))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: ResolutionType,
    merge_data: Option<MergeData>,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthenticatedDevice>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolutionOutcome>, AppError> {
    let conflict_id = parse_conflict_id(&id)?;
    let outcome = state
        .engine
        .resolver
        .resolve_conflict(
            conflict_id,
            request.resolution,
            request.merge_data,
            &identity.user_id,
        )
        .await?;
    tracing::info!(
        conflict = %conflict_id,
        resolution = request.resolution.as_str(),
        user = %identity.user_id,
        "Conflict resolved via API"
    );
    Ok(Json(outcome))
}

async fn sync_status(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthenticatedDevice>,
) -> Result<Json<SyncStatus>, AppError> {
    let status = state
        .engine
        .sync
        .get_sync_status(Some(&identity.user_id))
        .await?;
    Ok(Json(status))
}

fn parse_conflict_id(raw: &str) -> Result<ConflictId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("invalid conflict id: {raw}")))
}

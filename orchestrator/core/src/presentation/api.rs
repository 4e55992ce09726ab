// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP API
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/health` | liveness |
//! | GET | `/api/agents?project_path=&status=` | `list` |
//! | POST | `/api/agents` | `create` |
//! | GET | `/api/agents/{id}` | `show` |
//! | POST | `/api/agents/{id}/attach` | `attach` |
//! | POST | `/api/agents/{id}/stop?remove=` | `stop` |
//! | POST | `/api/agents/cleanup?remove=` | `cleanup_all` |
//! | POST | `/api/reconcile?fix=` | `reconcile` |
//! | GET | `/api/projects` | `list_projects` |
//!
//! Errors are JSON objects carrying `code`, `step`, `retryable` and
//! `message`, with the HTTP status of the error variant.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::application::lifecycle::{
    AgentView, AttachTarget, CleanupReport, CreateOptions, CreatedAgent, LifecycleOrchestrator, ListFilter,
    ReconcileReport, StopOutcome,
};
use crate::domain::agent::AgentId;
use crate::domain::errors::OrchestratorError;
use crate::domain::project::Project;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub start_time: Instant,
}

pub fn app(orchestrator: Arc<LifecycleOrchestrator>) -> Router {
    let state = AppState { orchestrator, start_time: Instant::now() };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/agents", get(list_agents_handler).post(create_agent_handler))
        .route("/api/agents/cleanup", post(cleanup_handler))
        .route("/api/agents/{id}", get(show_agent_handler))
        .route("/api/agents/{id}/attach", post(attach_agent_handler))
        .route("/api/agents/{id}/stop", post(stop_agent_handler))
        .route("/api/reconcile", post(reconcile_handler))
        .route("/api/projects", get(list_projects_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`OrchestratorError`] rendered as a JSON response.
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "code": err.code(),
            "step": err.failed_step(),
            "retryable": err.is_retryable(),
            "message": err.to_string(),
        });
        match &err {
            OrchestratorError::PartialFailure { succeeded, failures } => {
                body["succeeded"] = serde_json::json!(succeeded);
                body["failures"] = serde_json::json!(failures);
            }
            OrchestratorError::CreateFailed { rollback, .. } => {
                body["rollback"] = serde_json::json!(rollback);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_agent_id(raw: &str) -> Result<AgentId, ApiError> {
    AgentId::parse(raw).map_err(|e| ApiError(OrchestratorError::InvalidRequest(e.to_string())))
}

#[derive(Debug, Default, Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    remove: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FixQuery {
    #[serde(default)]
    fix: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn list_agents_handler(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Json<Vec<AgentView>>> {
    Ok(Json(state.orchestrator.list(&filter).await?))
}

async fn create_agent_handler(
    State(state): State<AppState>,
    Json(options): Json<CreateOptions>,
) -> ApiResult<(StatusCode, Json<CreatedAgent>)> {
    let created = state.orchestrator.create(options).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn show_agent_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<AgentView>> {
    let id = parse_agent_id(&id)?;
    Ok(Json(state.orchestrator.show(&id).await?))
}

async fn attach_agent_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AttachTarget>> {
    let id = parse_agent_id(&id)?;
    Ok(Json(state.orchestrator.attach(&id).await?))
}

async fn stop_agent_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> ApiResult<Json<StopOutcome>> {
    let id = parse_agent_id(&id)?;
    Ok(Json(state.orchestrator.stop(&id, query.remove).await?))
}

async fn cleanup_handler(
    State(state): State<AppState>,
    Query(query): Query<RemoveQuery>,
) -> ApiResult<Json<CleanupReport>> {
    Ok(Json(state.orchestrator.cleanup_all(query.remove).await?))
}

async fn reconcile_handler(
    State(state): State<AppState>,
    Query(query): Query<FixQuery>,
) -> ApiResult<Json<ReconcileReport>> {
    Ok(Json(state.orchestrator.reconcile(query.fix).await?))
}

async fn list_projects_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.orchestrator.list_projects().await?))
}

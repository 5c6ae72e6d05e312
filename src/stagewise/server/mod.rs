// SPDX-License-Identifier: MIT

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adk::error::WorkflowError;
use crate::stagewise::bootstrap::ComponentStatus;
use crate::stagewise::config::RunConfig;
use crate::stagewise::workflow::service::WorkflowService;

static STARTED_AT: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
    pub components: Arc<Vec<ComponentStatus>>,
}

pub fn router(state: AppState) -> Router {
    Lazy::force(&STARTED_AT);
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/runs", get(list_runs).post(start_run))
        .route("/api/runs/stream", post(stream_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/resume", post(resume_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Maps workflow errors onto HTTP status codes
pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::InvalidConfig(_) | WorkflowError::SchemaViolation { .. } => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::Step(_) | WorkflowError::Persistence { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let uptime = (Utc::now() - *STARTED_AT).num_seconds();
    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "components": *state.components,
    }))
}

async fn list_runs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let runs: Vec<Value> = state
        .service
        .list()
        .await?
        .into_iter()
        .map(|run| {
            json!({
                "run_id": run.run_id,
                "stage": run.stage,
                "next_stage": run.next_stage,
                "cursor": run.cursor,
                "outcome": run.outcome,
                "updated_at": run.updated_at,
            })
        })
        .collect();
    Ok(Json(json!(runs)))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = state.service.status(&id).await?;
    Ok(Json(json!(status)))
}

#[derive(Deserialize)]
struct StartRequest {
    query: String,
    /// Overrides the service defaults for this run
    #[serde(default)]
    config: Option<RunConfig>,
}

async fn start_run(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<Value>, ApiError> {
    let config = payload
        .config
        .unwrap_or_else(|| state.service.defaults().clone());
    let handle = state.service.start_with(&payload.query, config).await?;
    Ok(Json(json!(handle)))
}

#[derive(Deserialize)]
struct ResumeRequest {
    #[serde(default)]
    approved: bool,
}

async fn resume_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ResumeRequest>,
) -> Result<Json<Value>, ApiError> {
    let result = state.service.resume(&id, payload.approved).await?;
    Ok(Json(json!({ "run_id": id, "result": result })))
}

async fn stream_run(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let config = payload
        .config
        .unwrap_or_else(|| state.service.defaults().clone());
    let (run_id, rx) = state
        .service
        .start_streaming(&payload.query, config)
        .await?;
    log::info!("Streaming run '{}'", run_id);

    let opening = stream::once(async move {
        Ok(Event::default()
            .event("run")
            .data(json!({ "run_id": run_id }).to_string()))
    });
    let events = ReceiverStream::new(rx).map(|event| {
        Ok(match Event::default().json_data(&event) {
            Ok(ev) => ev,
            Err(e) => Event::default().event("error").data(e.to_string()),
        })
    });

    Ok(Sse::new(opening.chain(events))
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(1))))
}

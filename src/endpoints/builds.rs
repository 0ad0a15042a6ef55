use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::error::Result;
use crate::models::build::{self, BuildStatus};
use crate::services::broadcaster::ProgressSnapshot;
use crate::services::scheduler::{AdmissionOutcome, TriggerRequest, TriggerResponse};
use crate::state::AppState;

pub fn builds_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_builds).post(trigger_build))
        .route("/ws", get(ws_handler))
        .route("/{id}", get(get_build))
        .route("/{id}/progress", get(get_build_progress))
        .route("/{id}/log", get(get_build_log))
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListBuildsQuery {
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    /// Only forward snapshots of this build
    pub build_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildLogResponse {
    pub build_id: i64,
    pub status: BuildStatus,
    pub current_step: i32,
    pub total_steps: i32,
    pub log: String,
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

/// Trigger a build for a configuration
async fn trigger_build(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    let response = state.scheduler.trigger(request).await?;

    let status = match response.outcome {
        AdmissionOutcome::Rejected => StatusCode::TOO_MANY_REQUESTS,
        AdmissionOutcome::Started | AdmissionOutcome::Queued => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

async fn list_builds(
    State(state): State<AppState>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<build::Model>>> {
    let limit = query.limit.clamp(1, 500);
    Ok(Json(state.store.list_recent(limit).await?))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<build::Model>> {
    Ok(Json(state.store.get(id).await?))
}

/// Current progress of a build, estimated against its most similar predecessor
async fn get_build_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProgressSnapshot>> {
    let build = state.store.get(id).await?;
    let similar = state
        .store
        .find_similar(build.config_id, build.total_steps, build.id)
        .await?;

    Ok(Json(ProgressSnapshot::from_build(
        &build,
        similar.as_ref(),
        Utc::now(),
    )))
}

async fn get_build_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BuildLogResponse>> {
    let build = state.store.get(id).await?;

    Ok(Json(BuildLogResponse {
        build_id: build.id,
        status: build.status,
        current_step: build.current_step,
        total_steps: build.total_steps,
        log: build.log,
    }))
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// WebSocket upgrade handler for live build progress
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> impl IntoResponse {
    tracing::info!(build_id = ?query.build_id, "Progress WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.build_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, build_id: Option<i64>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.progress_tx().subscribe();

    tracing::info!(
        "New WebSocket client connected for build progress, subscribers: {}",
        state.progress_tx().receiver_count()
    );

    let send_task = tokio::spawn(async move {
        loop {
            let snapshot = match rx.recv().await {
                Ok(snapshot) => snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress WebSocket client lagging, skipping snapshots");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if build_id.is_some_and(|id| id != snapshot.build_id) {
                continue;
            }

            let text = match serde_json::to_string(&snapshot) {
                Ok(text) => text,
                Err(e) => {
                    debug!("Failed to encode progress snapshot: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Pings are answered by axum; only close and errors matter here
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    debug!("WebSocket client requested close");
                    break;
                }
                Err(e) => {
                    debug!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    tracing::info!("Progress WebSocket client disconnected");
}

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::configuration;
use crate::state::AppState;

pub fn configs_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_configs))
        .route("/{id}", delete(delete_config))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct DeleteConfigQuery {
    /// Configuration that inherits the deleted one's builds
    pub reassign_to: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteConfigResponse {
    pub deleted: i64,
    pub reassigned_builds: u64,
}

async fn list_configs(State(state): State<AppState>) -> Result<Json<Vec<configuration::Model>>> {
    Ok(Json(state.configurations.list().await?))
}

async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteConfigQuery>,
) -> Result<Json<DeleteConfigResponse>> {
    let reassigned_builds = state.configurations.delete(id, query.reassign_to).await?;

    Ok(Json(DeleteConfigResponse {
        deleted: id,
        reassigned_builds,
    }))
}

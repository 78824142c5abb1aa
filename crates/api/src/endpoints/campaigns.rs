//! Campaign control endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use chrono::{DateTime, Utc};
use herald_common::AppResult;
use herald_core::Campaign;
use serde::Deserialize;

use crate::{middleware::AppState, response::ApiResponse};

/// Reschedule request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

async fn schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Campaign>> {
    Ok(ApiResponse::ok(state.scheduler.schedule(&id).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Campaign>> {
    Ok(ApiResponse::ok(state.scheduler.cancel(&id).await?))
}

async fn reschedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> AppResult<ApiResponse<Campaign>> {
    let campaign = state.scheduler.reschedule(&id, req.scheduled_at).await?;
    Ok(ApiResponse::ok(campaign))
}

async fn pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Campaign>> {
    Ok(ApiResponse::ok(state.scheduler.pause(&id).await?))
}

async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Campaign>> {
    Ok(ApiResponse::ok(state.scheduler.resume(&id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/schedule", post(schedule))
        .route("/{id}/cancel", post(cancel))
        .route("/{id}/reschedule", post(reschedule))
        .route("/{id}/pause", post(pause))
        .route("/{id}/resume", post(resume))
}

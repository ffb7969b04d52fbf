use axum::{extract::State, Json};
use chrono::Utc;

use crate::{
    api::{
        dto::{HealthResponse, StoreHealth},
        AppState,
    },
    status::{HealthSummary, SystemStatus},
};

/// Full dashboard view: per-sensor snapshots, counts and recommendations.
/// Failed lookups show up as offline sensors or `null` counts.
#[utoipa::path(
    get,
    path = "/api/system/status",
    responses(
        (status = 200, description = "System status", body = SystemStatus),
    ),
    tag = "system"
)]
pub async fn system_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.status.system_status().await)
}

#[utoipa::path(
    get,
    path = "/api/system/health",
    responses(
        (status = 200, description = "Overall health and sensor counts", body = HealthSummary),
    ),
    tag = "system"
)]
pub async fn health_summary(State(state): State<AppState>) -> Json<HealthSummary> {
    Json(state.status.health_summary().await)
}

/// Liveness probe. Answers `200` even when the store is unreachable.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        store: StoreHealth {
            backend: state.store.backend().to_owned(),
            available: state.store.is_available().await,
        },
        timestamp: Utc::now(),
    })
}

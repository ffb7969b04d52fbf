pub mod dto;
pub mod errors;
pub mod extract;
pub mod handlers;

use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    alerts::AlertService, control::CommandService, sensors::SensorService, status::StatusService,
    store::Store,
};
use handlers::{alerts, commands, sensors, system, ApiDoc};

/// Shared handler state; cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sensors: SensorService,
    pub alerts: AlertService,
    pub commands: CommandService,
    pub status: StatusService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        simulated_execution: Option<Duration>,
        sensor_stale_after: Duration,
    ) -> Self {
        let stale_after =
            chrono::Duration::from_std(sensor_stale_after).unwrap_or(chrono::Duration::MAX);
        let sensors = SensorService::new(store.clone());
        Self {
            alerts: AlertService::new(store.clone()),
            commands: CommandService::new(store.clone(), simulated_execution),
            status: StatusService::new(store.clone(), sensors.clone(), stale_after),
            sensors,
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/api/sensors/readings",
            post(sensors::create_reading).get(sensors::list_readings),
        )
        .route("/api/sensors/latest", get(sensors::latest_readings))
        .route("/api/sensors/{sensor_type}/latest", get(sensors::latest_for_type))
        .route("/api/alerts", get(alerts::list_alerts))
        .route("/api/alerts/stats", get(alerts::alert_stats))
        .route("/api/alerts/acknowledge", put(alerts::bulk_acknowledge))
        .route("/api/alerts/{id}", get(alerts::get_alert))
        .route("/api/alerts/{id}/acknowledge", put(alerts::acknowledge_alert))
        .route("/api/alerts/{id}/resolve", put(alerts::resolve_alert))
        .route("/api/alerts/{id}/reactivate", put(alerts::reactivate_alert))
        .route("/api/alerts/{id}/false-alarm", put(alerts::mark_false_alarm))
        .route("/api/commands", post(commands::enqueue_command))
        .route("/api/commands/active", get(commands::active_commands))
        .route("/api/commands/stats", get(commands::command_stats))
        .route("/api/commands/{id}", get(commands::get_command))
        .route("/api/commands/{id}/status", put(commands::update_command_status))
        .route("/api/commands/{id}/cancel", post(commands::cancel_command))
        .route("/api/devices/{device_id}/commands", get(commands::device_history))
        .route(
            "/api/devices/{device_id}/commands/pending",
            get(commands::device_pending),
        )
        .route("/api/devices/{device_id}/commands/last", get(commands::device_last))
        .route("/api/system/status", get(system::system_status))
        .route("/api/system/health", get(system::health_summary))
        .route("/health", get(system::health))
        .with_state(state)
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

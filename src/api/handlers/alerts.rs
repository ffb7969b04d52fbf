use axum::{extract::State, Json};
use uuid::Uuid;

use crate::{
    api::{
        dto::{
            ActorRequest, AlertDto, AlertPageDto, AlertQuery, BulkAcknowledgeRequest,
            BulkAcknowledgeResponse, ResolveRequest, WindowQuery,
        },
        errors::AppError,
        extract::{AppJson, AppPath, AppQuery},
        AppState,
    },
    store::{AlertFilter, AlertStats, Pagination},
    window::TimeWindow,
};

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct AlertStatsResponse {
    pub time_window: TimeWindow,
    #[serde(flatten)]
    pub stats: AlertStats,
}

#[utoipa::path(
    get,
    path = "/api/alerts",
    params(AlertQuery),
    responses(
        (status = 200, description = "Page of alerts, newest first by default", body = AlertPageDto),
        (status = 400, description = "Invalid filter or pagination"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "alerts"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<AlertQuery>,
) -> Result<Json<AlertPageDto>, AppError> {
    let page = Pagination::new(q.page, q.limit)?;
    let filter = AlertFilter {
        acknowledged: q.acknowledged,
        severity: q.severity,
        status: q.status,
        sensor_type: q.sensor_type,
        from: q.from,
        to: q.to,
    };
    let alerts = state
        .alerts
        .list(&filter, q.order.unwrap_or_default(), page)
        .await?;
    Ok(Json(alerts.into()))
}

#[utoipa::path(
    get,
    path = "/api/alerts/stats",
    params(WindowQuery),
    responses(
        (status = 200, description = "Alert counts for the window", body = AlertStatsResponse),
        (status = 400, description = "Unknown window"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "alerts"
)]
pub async fn alert_stats(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<WindowQuery>,
) -> Result<Json<AlertStatsResponse>, AppError> {
    let window = match q.window.as_deref() {
        Some(raw) => raw.parse::<TimeWindow>()?,
        None => TimeWindow::default(),
    };
    let stats = state.alerts.stats(window).await?;
    Ok(Json(AlertStatsResponse {
        time_window: window,
        stats,
    }))
}

/// Acknowledge many alerts at once. Unknown and already-acknowledged ids are
/// skipped.
#[utoipa::path(
    put,
    path = "/api/alerts/acknowledge",
    request_body = BulkAcknowledgeRequest,
    responses(
        (status = 200, description = "Number of alerts acknowledged", body = BulkAcknowledgeResponse),
        (status = 400, description = "Empty or malformed id list"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "alerts"
)]
pub async fn bulk_acknowledge(
    State(state): State<AppState>,
    AppJson(body): AppJson<BulkAcknowledgeRequest>,
) -> Result<Json<BulkAcknowledgeResponse>, AppError> {
    let acknowledged = state
        .alerts
        .bulk_acknowledge(&body.ids, body.acknowledged_by)
        .await?;
    Ok(Json(BulkAcknowledgeResponse { acknowledged }))
}

#[utoipa::path(
    get,
    path = "/api/alerts/{id}",
    params(("id" = Uuid, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert", body = AlertDto),
        (status = 404, description = "No such alert"),
    ),
    tag = "alerts"
)]
pub async fn get_alert(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<AlertDto>, AppError> {
    Ok(Json(state.alerts.get(id).await?.into()))
}

#[utoipa::path(
    put,
    path = "/api/alerts/{id}/acknowledge",
    params(("id" = Uuid, Path, description = "Alert id")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Acknowledged alert", body = AlertDto),
        (status = 404, description = "No such alert"),
    ),
    tag = "alerts"
)]
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<ActorRequest>,
) -> Result<Json<AlertDto>, AppError> {
    let alert = state.alerts.acknowledge(id, body.acknowledged_by).await?;
    Ok(Json(alert.into()))
}

#[utoipa::path(
    put,
    path = "/api/alerts/{id}/resolve",
    params(("id" = Uuid, Path, description = "Alert id")),
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Resolved alert", body = AlertDto),
        (status = 404, description = "No such alert"),
    ),
    tag = "alerts"
)]
pub async fn resolve_alert(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<ResolveRequest>,
) -> Result<Json<AlertDto>, AppError> {
    let alert = state.alerts.resolve(id, body.resolution_notes).await?;
    Ok(Json(alert.into()))
}

#[utoipa::path(
    put,
    path = "/api/alerts/{id}/reactivate",
    params(("id" = Uuid, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Active alert", body = AlertDto),
        (status = 404, description = "No such alert"),
    ),
    tag = "alerts"
)]
pub async fn reactivate_alert(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<AlertDto>, AppError> {
    Ok(Json(state.alerts.reactivate(id).await?.into()))
}

#[utoipa::path(
    put,
    path = "/api/alerts/{id}/false-alarm",
    params(("id" = Uuid, Path, description = "Alert id")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Alert marked as false alarm", body = AlertDto),
        (status = 404, description = "No such alert"),
    ),
    tag = "alerts"
)]
pub async fn mark_false_alarm(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<ActorRequest>,
) -> Result<Json<AlertDto>, AppError> {
    let alert = state.alerts.mark_false_alarm(id, body.acknowledged_by).await?;
    Ok(Json(alert.into()))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::api::handlers::test_support::server;

    async fn raise(server: &TestServer, sensor_type: &str, value: f64) -> String {
        let body: Value = server
            .post("/api/sensors/readings")
            .json(&json!({ "type": sensor_type, "value": value }))
            .await
            .json();
        body["alert"]["id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn bulk_acknowledge_counts_only_known_alerts() {
        let (server, _) = server();
        let a = raise(&server, "gas", 350.0).await;
        let b = raise(&server, "humidity", 90.0).await;

        let body: Value = server
            .put("/api/alerts/acknowledge")
            .json(&json!({
                "ids": [a, b, "00000000-0000-0000-0000-000000000000"],
                "acknowledged_by": "night shift"
            }))
            .await
            .json();
        assert_eq!(body["acknowledged"], 2);

        let page: Value = server
            .get("/api/alerts")
            .add_query_param("acknowledged", false)
            .await
            .json();
        assert_eq!(page["total"], 0);
    }

    #[tokio::test]
    async fn single_alert_lifecycle() {
        let (server, _) = server();
        let id = raise(&server, "fire", 1.0).await;

        let body: Value = server
            .put(&format!("/api/alerts/{id}/acknowledge"))
            .json(&json!({ "acknowledged_by": "alice" }))
            .await
            .json();
        assert_eq!(body["status"], "acknowledged");
        assert_eq!(body["acknowledged_by"], "alice");
        assert_eq!(body["severity"], "critical");

        let body: Value = server
            .put(&format!("/api/alerts/{id}/resolve"))
            .json(&json!({ "resolution_notes": "toast" }))
            .await
            .json();
        assert_eq!(body["status"], "resolved");
        assert_eq!(body["resolved"], true);

        let body: Value = server
            .put(&format!("/api/alerts/{id}/reactivate"))
            .await
            .json();
        assert_eq!(body["status"], "active");
        assert_eq!(body["acknowledged"], false);

        let body: Value = server
            .put(&format!("/api/alerts/{id}/false-alarm"))
            .json(&json!({}))
            .await
            .json();
        assert_eq!(body["status"], "false_alarm");

        let body: Value = server.get(&format!("/api/alerts/{id}")).await.json();
        assert_eq!(body["status"], "false_alarm");
    }

    #[tokio::test]
    async fn unknown_alert_is_404_and_bad_id_is_400() {
        let (server, _) = server();
        let resp = server
            .put("/api/alerts/00000000-0000-0000-0000-000000000000/acknowledge")
            .json(&json!({}))
            .await;
        resp.assert_status_not_found();
        let body: Value = resp.json();
        assert_eq!(body["kind"], "not_found");

        server
            .get("/api/alerts/not-a-uuid")
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn stats_validate_window() {
        let (server, _) = server();
        raise(&server, "gas", 350.0).await;

        let body: Value = server
            .get("/api/alerts/stats")
            .add_query_param("window", "7d")
            .await
            .json();
        assert_eq!(body["time_window"], "7d");
        assert_eq!(body["total"], 1);
        assert_eq!(body["by_severity"]["high"], 1);

        let resp = server
            .get("/api/alerts/stats")
            .add_query_param("window", "2w")
            .await;
        resp.assert_status_bad_request();
    }

    #[tokio::test]
    async fn list_on_offline_store_is_503() {
        let (server, store) = server();
        store.set_available(false);
        server
            .get("/api/alerts")
            .await
            .assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}

use axum::{extract::State, http::StatusCode, Json};
use uuid::Uuid;

use crate::{
    api::{
        dto::{
            ActiveQuery, CancelRequest, CommandDto, CommandHistoryDto, HistoryQuery, LimitQuery,
            WindowQuery,
        },
        errors::AppError,
        extract::{AppJson, AppPath, AppQuery},
        AppState,
    },
    control::{
        service::CommandStats,
        validation::CommandRequest,
        StatusUpdate,
    },
    store::ActiveCommandFilter,
    window::TimeWindow,
};

/// Queue a command for an actuator.
#[utoipa::path(
    post,
    path = "/api/commands",
    request_body = CommandRequest,
    responses(
        (status = 201, description = "Command queued", body = CommandDto),
        (status = 400, description = "Command rejected by validation"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "commands"
)]
pub async fn enqueue_command(
    State(state): State<AppState>,
    AppJson(body): AppJson<CommandRequest>,
) -> Result<(StatusCode, Json<CommandDto>), AppError> {
    let command = state.commands.enqueue(body).await?;
    Ok((StatusCode::CREATED, Json(command.into())))
}

/// Pending, sent and executing commands: urgent first, then by priority.
#[utoipa::path(
    get,
    path = "/api/commands/active",
    params(ActiveQuery),
    responses(
        (status = 200, description = "Active commands", body = Vec<CommandDto>),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "commands"
)]
pub async fn active_commands(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<ActiveQuery>,
) -> Result<Json<Vec<CommandDto>>, AppError> {
    let filter = ActiveCommandFilter {
        device_type: q.device_type,
        location: q.location,
    };
    let commands = state.commands.active(&filter, q.limit).await?;
    Ok(Json(CommandDto::list(commands)))
}

#[utoipa::path(
    get,
    path = "/api/commands/stats",
    params(WindowQuery),
    responses(
        (status = 200, description = "Command counts per device type", body = CommandStats),
        (status = 400, description = "Unknown window"),
    ),
    tag = "commands"
)]
pub async fn command_stats(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<WindowQuery>,
) -> Result<Json<CommandStats>, AppError> {
    let window = match q.window.as_deref() {
        Some(raw) => raw.parse::<TimeWindow>()?,
        None => TimeWindow::default(),
    };
    Ok(Json(state.commands.stats(window).await?))
}

#[utoipa::path(
    get,
    path = "/api/commands/{id}",
    params(("id" = Uuid, Path, description = "Command id")),
    responses(
        (status = 200, description = "Command", body = CommandDto),
        (status = 404, description = "No such command"),
    ),
    tag = "commands"
)]
pub async fn get_command(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<CommandDto>, AppError> {
    Ok(Json(state.commands.get(id).await?.into()))
}

/// Report a lifecycle change. Only forward moves are accepted.
#[utoipa::path(
    put,
    path = "/api/commands/{id}/status",
    params(("id" = Uuid, Path, description = "Command id")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Updated command", body = CommandDto),
        (status = 404, description = "No such command"),
        (status = 409, description = "Transition not allowed from the current status"),
    ),
    tag = "commands"
)]
pub async fn update_command_status(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<StatusUpdate>,
) -> Result<Json<CommandDto>, AppError> {
    Ok(Json(state.commands.transition(id, body).await?.into()))
}

#[utoipa::path(
    post,
    path = "/api/commands/{id}/cancel",
    params(("id" = Uuid, Path, description = "Command id")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancelled command", body = CommandDto),
        (status = 404, description = "No such command"),
        (status = 409, description = "Command already finished"),
    ),
    tag = "commands"
)]
pub async fn cancel_command(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<CancelRequest>,
) -> Result<Json<CommandDto>, AppError> {
    Ok(Json(state.commands.cancel(id, body.reason).await?.into()))
}

#[utoipa::path(
    get,
    path = "/api/devices/{device_id}/commands",
    params(
        ("device_id" = String, Path, description = "Device id"),
        HistoryQuery,
    ),
    responses(
        (status = 200, description = "Command history, newest first", body = CommandHistoryDto),
    ),
    tag = "devices"
)]
pub async fn device_history(
    State(state): State<AppState>,
    AppPath(device_id): AppPath<String>,
    AppQuery(q): AppQuery<HistoryQuery>,
) -> Result<Json<CommandHistoryDto>, AppError> {
    let history = state.commands.history(&device_id, q.status, q.limit).await?;
    Ok(Json(CommandHistoryDto {
        device_id,
        commands: CommandDto::list(history.commands),
        counts: history.counts,
    }))
}

/// Commands a device should execute next, highest priority first.
#[utoipa::path(
    get,
    path = "/api/devices/{device_id}/commands/pending",
    params(
        ("device_id" = String, Path, description = "Device id"),
        LimitQuery,
    ),
    responses(
        (status = 200, description = "Pending commands", body = Vec<CommandDto>),
    ),
    tag = "devices"
)]
pub async fn device_pending(
    State(state): State<AppState>,
    AppPath(device_id): AppPath<String>,
    AppQuery(q): AppQuery<LimitQuery>,
) -> Result<Json<Vec<CommandDto>>, AppError> {
    let commands = state.commands.pending_for(&device_id, q.limit).await?;
    Ok(Json(CommandDto::list(commands)))
}

#[utoipa::path(
    get,
    path = "/api/devices/{device_id}/commands/last",
    params(("device_id" = String, Path, description = "Device id")),
    responses(
        (status = 200, description = "Newest command, or null", body = CommandDto),
    ),
    tag = "devices"
)]
pub async fn device_last(
    State(state): State<AppState>,
    AppPath(device_id): AppPath<String>,
) -> Result<Json<Option<CommandDto>>, AppError> {
    let last = state.commands.last_for(&device_id).await?;
    Ok(Json(last.map(Into::into)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::api::handlers::test_support::server;

    #[tokio::test]
    async fn enqueue_returns_command_with_derived_fields() {
        let (server, _) = server();
        let resp = server
            .post("/api/commands")
            .json(&json!({
                "device_id": "esp32-hall",
                "device_type": "led",
                "command": "blink",
                "command_value": 50,
                "parameters": { "frequency": 2, "priority": 7 }
            }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["command_code"], "LED_BLINK(50, 2)");
        assert_eq!(body["parameters"]["priority"], 7);
        assert_eq!(body["is_active"], true);
        assert_eq!(body["is_expired"], false);
    }

    #[tokio::test]
    async fn lcd_show_without_text_is_400() {
        let (server, _) = server();
        let resp = server
            .post("/api/commands")
            .json(&json!({ "device_type": "lcd", "command": "show" }))
            .await;
        resp.assert_status_bad_request();
        let body: Value = resp.json();
        assert_eq!(body["kind"], "validation");
        assert!(body["error"].as_str().unwrap().contains("display_text"));
    }

    #[tokio::test]
    async fn unknown_device_type_is_400() {
        let (server, _) = server();
        server
            .post("/api/commands")
            .json(&json!({ "device_type": "toaster", "command": "on" }))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn completed_to_pending_is_409() {
        let (server, _) = server();
        let cmd: Value = server
            .post("/api/commands")
            .json(&json!({ "device_id": "pump", "device_type": "relay", "command": "on" }))
            .await
            .json();
        let id = cmd["id"].as_str().unwrap();
        let path = format!("/api/commands/{id}/status");

        for status in ["sent", "executing", "completed"] {
            server
                .put(&path)
                .json(&json!({ "status": status }))
                .await
                .assert_status_ok();
        }

        let resp = server.put(&path).json(&json!({ "status": "pending" })).await;
        resp.assert_status(StatusCode::CONFLICT);
        let body: Value = resp.json();
        assert_eq!(body["kind"], "conflict");

        let cmd: Value = server.get(&format!("/api/commands/{id}")).await.json();
        assert_eq!(cmd["status"], "completed");
        assert!(cmd["completed_at"].is_string());
    }

    #[tokio::test]
    async fn device_queue_endpoints() {
        let (server, _) = server();
        for priority in [2, 9] {
            server
                .post("/api/commands")
                .json(&json!({
                    "device_id": "fan",
                    "device_type": "motor",
                    "command": "on",
                    "parameters": { "priority": priority }
                }))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let pending: Vec<Value> = server.get("/api/devices/fan/commands/pending").await.json();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0]["parameters"]["priority"], 9);

        let last: Value = server.get("/api/devices/fan/commands/last").await.json();
        assert_eq!(last["parameters"]["priority"], 9);

        let none: Value = server.get("/api/devices/nobody/commands/last").await.json();
        assert!(none.is_null());

        let id = pending[1]["id"].as_str().unwrap();
        server
            .post(&format!("/api/commands/{id}/cancel"))
            .json(&json!({ "reason": "manual override" }))
            .await
            .assert_status_ok();

        let history: Value = server.get("/api/devices/fan/commands").await.json();
        assert_eq!(history["counts"]["total"], 2);
        assert_eq!(history["counts"]["pending"], 1);
        assert_eq!(history["commands"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mixed_case_device_sees_its_own_commands() {
        let (server, _) = server();
        server
            .post("/api/commands")
            .json(&json!({ "device_id": "ESP32-Hall", "device_type": "relay", "command": "on" }))
            .await
            .assert_status(StatusCode::CREATED);

        let pending: Vec<Value> = server
            .get("/api/devices/ESP32-Hall/commands/pending")
            .await
            .json();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["device_id"], "esp32-hall");

        let last: Value = server.get("/api/devices/ESP32-Hall/commands/last").await.json();
        assert_eq!(last["id"], pending[0]["id"]);

        let history: Value = server.get("/api/devices/ESP32-Hall/commands").await.json();
        assert_eq!(history["counts"]["total"], 1);
    }

    #[tokio::test]
    async fn active_and_stats() {
        let (server, _) = server();
        server
            .post("/api/commands")
            .json(&json!({ "device_type": "buzzer", "command": "on", "source": "emergency" }))
            .await;
        server
            .post("/api/commands")
            .json(&json!({ "device_type": "valve", "command": "off" }))
            .await;

        let active: Vec<Value> = server.get("/api/commands/active").await.json();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0]["device_type"], "buzzer");
        assert_eq!(active[0]["is_urgent"], true);
        assert_eq!(active[0]["parameters"]["priority"], 10);

        let stats: Value = server.get("/api/commands/stats").await.json();
        assert_eq!(stats["time_window"], "24h");
        assert_eq!(stats["total"], 2);

        server
            .get("/api/commands/stats")
            .add_query_param("window", "forever")
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn unknown_command_is_404() {
        let (server, _) = server();
        server
            .get("/api/commands/00000000-0000-0000-0000-000000000000")
            .await
            .assert_status_not_found();
    }
}

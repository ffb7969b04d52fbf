use axum::{extract::State, http::StatusCode, Json};

use crate::{
    api::{
        dto::{
            CreateReadingRequest, CreateReadingResponse, LatestReadingDto, ReadingPageDto,
            ReadingQuery,
        },
        errors::AppError,
        extract::{AppJson, AppPath, AppQuery},
        AppState,
    },
    db::models::SensorType,
    sensors::NewReading,
    store::{Pagination, ReadingFilter},
};

/// Ingest one sensor reading. The reading is classified and, when abnormal,
/// raises an alert before the response is sent.
#[utoipa::path(
    post,
    path = "/api/sensors/readings",
    request_body = CreateReadingRequest,
    responses(
        (status = 201, description = "Reading stored", body = CreateReadingResponse),
        (status = 400, description = "Invalid reading"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "sensors"
)]
pub async fn create_reading(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateReadingRequest>,
) -> Result<(StatusCode, Json<CreateReadingResponse>), AppError> {
    let recorded = state.sensors.record(NewReading::try_from(body)?).await?;
    let status = recorded.reading.status;
    Ok((
        StatusCode::CREATED,
        Json(CreateReadingResponse {
            reading: recorded.reading.into(),
            status,
            alert: recorded.alert.map(Into::into),
        }),
    ))
}

/// Query stored readings, newest first by default.
#[utoipa::path(
    get,
    path = "/api/sensors/readings",
    params(ReadingQuery),
    responses(
        (status = 200, description = "Page of readings", body = ReadingPageDto),
        (status = 400, description = "Invalid filter or pagination"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "sensors"
)]
pub async fn list_readings(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<ReadingQuery>,
) -> Result<Json<ReadingPageDto>, AppError> {
    let page = Pagination::new(q.page, q.limit)?;
    let filter = ReadingFilter {
        sensor_type: q.sensor_type,
        status: q.status,
        device_id: q.device_id,
        from: q.from,
        to: q.to,
    };
    let readings = state
        .sensors
        .query(&filter, q.order.unwrap_or_default(), page)
        .await?;
    Ok(Json(readings.into()))
}

/// Latest reading of every sensor type. Types without data, or whose lookup
/// failed, report `no_data`.
#[utoipa::path(
    get,
    path = "/api/sensors/latest",
    responses(
        (status = 200, description = "One entry per sensor type", body = Vec<LatestReadingDto>),
    ),
    tag = "sensors"
)]
pub async fn latest_readings(State(state): State<AppState>) -> Json<Vec<LatestReadingDto>> {
    let latest = state.sensors.latest_per_type(&SensorType::ALL).await;
    Json(
        latest
            .into_iter()
            .map(|(sensor_type, reading)| LatestReadingDto::new(sensor_type, reading))
            .collect(),
    )
}

#[utoipa::path(
    get,
    path = "/api/sensors/{sensor_type}/latest",
    params(
        ("sensor_type" = SensorType, Path, description = "Sensor type"),
    ),
    responses(
        (status = 200, description = "Latest reading or no_data placeholder", body = LatestReadingDto),
        (status = 400, description = "Unknown sensor type"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "sensors"
)]
pub async fn latest_for_type(
    State(state): State<AppState>,
    AppPath(sensor_type): AppPath<SensorType>,
) -> Result<Json<LatestReadingDto>, AppError> {
    let reading = state.sensors.latest_by_type(sensor_type).await?;
    Ok(Json(LatestReadingDto::new(sensor_type, reading)))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    db::models::{
        Alert, AlertSeverity, AlertStatus, CommandAction, CommandParameters, CommandSource,
        CommandStatus, DeviceCommand, DeviceType, ReadingStatus, SensorReading, SensorType,
    },
    error::ServiceError,
    sensors::NewReading,
    store::{CommandCounts, Page, SortOrder},
};

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorReadingDto {
    pub id: Uuid,
    pub device_id: String,
    pub sensor_type: SensorType,
    /// `null` when the device reported no value.
    pub value: Option<f64>,
    pub status: ReadingStatus,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<SensorReading> for SensorReadingDto {
    fn from(r: SensorReading) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            sensor_type: r.sensor_type,
            value: r.value,
            status: r.status,
            recorded_at: r.recorded_at,
            created_at: r.created_at,
        }
    }
}

/// Raw sensor payload: numeric, or boolean for binary sensors.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Bool(bool),
}

impl RawValue {
    pub fn as_f64(self) -> f64 {
        match self {
            RawValue::Number(v) => v,
            RawValue::Bool(true) => 1.0,
            RawValue::Bool(false) => 0.0,
        }
    }
}

/// Distinguishes an explicit `null` (`Some(None)`) from a missing field
/// (`None`, via `#[serde(default)]`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Request body for `POST /api/sensors/readings`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReadingRequest {
    #[serde(rename = "type", alias = "sensor_type")]
    pub sensor_type: SensorType,
    /// Number, boolean, or `null` for an unreadable sensor. Required.
    #[serde(default, deserialize_with = "present")]
    #[schema(value_type = Option<f64>)]
    pub value: Option<Option<RawValue>>,
    /// Defaults to `"default"`.
    #[serde(alias = "deviceId")]
    pub device_id: Option<String>,
    /// Measurement time; defaults to ingestion time.
    #[serde(alias = "timestamp")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl TryFrom<CreateReadingRequest> for NewReading {
    type Error = ServiceError;

    fn try_from(req: CreateReadingRequest) -> Result<Self, Self::Error> {
        let value = req
            .value
            .ok_or_else(|| ServiceError::validation("value is required (use null when unreadable)"))?;
        Ok(NewReading {
            sensor_type: req.sensor_type,
            value: value.map(RawValue::as_f64),
            device_id: req.device_id,
            recorded_at: req.recorded_at,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateReadingResponse {
    pub reading: SensorReadingDto,
    pub status: ReadingStatus,
    /// The alert raised by this reading, if any.
    pub alert: Option<AlertDto>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LatestStatus {
    Normal,
    Warning,
    Danger,
    Unknown,
    NoData,
}

impl From<ReadingStatus> for LatestStatus {
    fn from(s: ReadingStatus) -> Self {
        match s {
            ReadingStatus::Normal => LatestStatus::Normal,
            ReadingStatus::Warning => LatestStatus::Warning,
            ReadingStatus::Danger => LatestStatus::Danger,
            ReadingStatus::Unknown => LatestStatus::Unknown,
        }
    }
}

/// Latest reading of one sensor type, or a `no_data` placeholder.
#[derive(Debug, Serialize, ToSchema)]
pub struct LatestReadingDto {
    pub sensor_type: SensorType,
    pub value: Option<f64>,
    pub status: LatestStatus,
    pub device_id: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
    /// Set only for `no_data`.
    pub message: Option<String>,
}

impl LatestReadingDto {
    pub fn new(sensor_type: SensorType, reading: Option<SensorReading>) -> Self {
        match reading {
            Some(r) => Self {
                sensor_type,
                value: r.value,
                status: r.status.into(),
                device_id: Some(r.device_id),
                recorded_at: Some(r.recorded_at),
                message: None,
            },
            None => Self {
                sensor_type,
                value: None,
                status: LatestStatus::NoData,
                device_id: None,
                recorded_at: None,
                message: Some(format!("No readings recorded for {sensor_type} yet")),
            },
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReadingQuery {
    pub sensor_type: Option<SensorType>,
    pub status: Option<ReadingStatus>,
    pub device_id: Option<String>,
    /// Inclusive lower bound on `recorded_at` (RFC3339).
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `recorded_at` (RFC3339).
    pub to: Option<DateTime<Utc>>,
    pub order: Option<SortOrder>,
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size, 1 to 500 (default 50).
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadingPageDto {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<SensorReadingDto>,
}

impl From<Page<SensorReading>> for ReadingPageDto {
    fn from(p: Page<SensorReading>) -> Self {
        let p = p.map(SensorReadingDto::from);
        Self {
            total: p.total,
            page: p.page,
            limit: p.limit,
            items: p.items,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertDto {
    pub id: Uuid,
    pub sensor_type: SensorType,
    pub sensor_value: Option<f64>,
    pub device_id: String,
    pub location: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Alert> for AlertDto {
    fn from(a: Alert) -> Self {
        Self {
            id: a.id,
            sensor_type: a.sensor_type,
            sensor_value: a.sensor_value,
            device_id: a.device_id,
            location: a.location,
            message: a.message,
            severity: a.severity,
            status: a.status,
            acknowledged: a.acknowledged,
            acknowledged_at: a.acknowledged_at,
            acknowledged_by: a.acknowledged_by,
            resolved: a.resolved,
            resolved_at: a.resolved_at,
            resolution_notes: a.resolution_notes,
            expires_at: a.expires_at,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AlertQuery {
    pub acknowledged: Option<bool>,
    pub severity: Option<AlertSeverity>,
    pub status: Option<AlertStatus>,
    pub sensor_type: Option<SensorType>,
    /// Inclusive lower bound on `created_at` (RFC3339).
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at` (RFC3339).
    pub to: Option<DateTime<Utc>>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertPageDto {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<AlertDto>,
}

impl From<Page<Alert>> for AlertPageDto {
    fn from(p: Page<Alert>) -> Self {
        let p = p.map(AlertDto::from);
        Self {
            total: p.total,
            page: p.page,
            limit: p.limit,
            items: p.items,
        }
    }
}

/// Body for single-alert acknowledge and false-alarm calls.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ActorRequest {
    /// Defaults to `"operator"`.
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkAcknowledgeRequest {
    pub ids: Vec<Uuid>,
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkAcknowledgeResponse {
    /// Number of alerts that were newly acknowledged.
    pub acknowledged: u64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ResolveRequest {
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WindowQuery {
    /// One of `1h`, `24h`, `7d`, `30d` (default `24h`).
    pub window: Option<String>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A device command together with its derived fields.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandDto {
    pub id: Uuid,
    pub device_id: String,
    pub device_type: DeviceType,
    pub location: String,
    pub command: CommandAction,
    pub command_value: Option<i32>,
    pub display_text: Option<String>,
    pub parameters: CommandParameters,
    pub status: CommandStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub device_response: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub source: CommandSource,
    pub requested_by: String,
    pub is_urgent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Firmware instruction, e.g. `LED_BLINK(50, 2)`.
    pub command_code: String,
    pub is_expired: bool,
    pub is_active: bool,
    pub is_emergency: bool,
    pub waiting_time_secs: i64,
}

impl CommandDto {
    pub fn at(c: DeviceCommand, now: DateTime<Utc>) -> Self {
        Self {
            command_code: c.command_code(),
            is_expired: c.is_expired(now),
            is_active: c.is_active(),
            is_emergency: c.is_emergency(),
            waiting_time_secs: c.waiting_time_secs(now),
            id: c.id,
            device_id: c.device_id,
            device_type: c.device_type,
            location: c.location,
            command: c.command,
            command_value: c.command_value,
            display_text: c.display_text,
            parameters: c.parameters,
            status: c.status,
            sent_at: c.sent_at,
            acknowledged_at: c.acknowledged_at,
            completed_at: c.completed_at,
            device_response: c.device_response,
            error_code: c.error_code,
            error_message: c.error_message,
            source: c.source,
            requested_by: c.requested_by,
            is_urgent: c.is_urgent,
            expires_at: c.expires_at,
            metadata: c.metadata,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }

    pub fn list(commands: Vec<DeviceCommand>) -> Vec<Self> {
        let now = Utc::now();
        commands.into_iter().map(|c| Self::at(c, now)).collect()
    }
}

impl From<DeviceCommand> for CommandDto {
    fn from(c: DeviceCommand) -> Self {
        Self::at(c, Utc::now())
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActiveQuery {
    pub device_type: Option<DeviceType>,
    pub location: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    pub status: Option<CommandStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommandHistoryDto {
    pub device_id: String,
    pub commands: Vec<CommandDto>,
    pub counts: CommandCounts,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct StoreHealth {
    pub backend: String,
    pub available: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving requests.
    pub status: String,
    pub store: StoreHealth,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: serde_json::Value) -> Result<NewReading, String> {
        let req: CreateReadingRequest = serde_json::from_value(body).map_err(|e| e.to_string())?;
        NewReading::try_from(req).map_err(|e| e.to_string())
    }

    #[test]
    fn numeric_value() {
        let r = parse(serde_json::json!({ "type": "gas", "value": 350 })).unwrap();
        assert_eq!(r.sensor_type, SensorType::Gas);
        assert_eq!(r.value, Some(350.0));
        assert!(r.device_id.is_none());
    }

    #[test]
    fn camel_case_device_id_is_accepted() {
        let r = parse(serde_json::json!({ "type": "gas", "value": 20, "deviceId": "esp32-lab" }))
            .unwrap();
        assert_eq!(r.device_id.as_deref(), Some("esp32-lab"));
    }

    #[test]
    fn boolean_value_is_coerced() {
        let r = parse(serde_json::json!({ "type": "fire", "value": true })).unwrap();
        assert_eq!(r.value, Some(1.0));
        let r = parse(serde_json::json!({ "type": "vibration", "value": false })).unwrap();
        assert_eq!(r.value, Some(0.0));
    }

    #[test]
    fn explicit_null_is_accepted() {
        let r = parse(serde_json::json!({ "type": "humidity", "value": null })).unwrap();
        assert_eq!(r.value, None);
    }

    #[test]
    fn missing_value_is_rejected() {
        let err = parse(serde_json::json!({ "type": "humidity" })).unwrap_err();
        assert!(err.contains("value is required"));
    }

    #[test]
    fn string_value_and_unknown_type_fail_to_parse() {
        assert!(parse(serde_json::json!({ "type": "gas", "value": "high" })).is_err());
        assert!(parse(serde_json::json!({ "type": "smoke", "value": 1 })).is_err());
        assert!(parse(serde_json::json!({ "value": 1 })).is_err());
    }

    #[test]
    fn latest_placeholder_for_missing_type() {
        let dto = LatestReadingDto::new(SensorType::Fire, None);
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["status"], "no_data");
        assert!(json["value"].is_null());
        assert_eq!(json["sensor_type"], "fire");
    }
}

pub mod alerts;
pub mod commands;
pub mod sensors;
pub mod system;

use utoipa::OpenApi;

use crate::{
    api::dto::{
        ActorRequest, AlertDto, AlertPageDto, BulkAcknowledgeRequest, BulkAcknowledgeResponse,
        CancelRequest, CommandDto, CommandHistoryDto, CreateReadingRequest, CreateReadingResponse,
        HealthResponse, LatestReadingDto, LatestStatus, ReadingPageDto, ResolveRequest,
        SensorReadingDto, StoreHealth,
    },
    control::{
        service::{CommandStatEntry, CommandStats, DeviceTypeStats},
        validation::{CommandRequest, ParametersRequest},
        StatusUpdate,
    },
    db::models::{
        AlertSeverity, AlertStatus, CommandAction, CommandParameters, CommandSource, CommandStatus,
        DeviceType, ReadingStatus, SensorType,
    },
    status::service::{
        HealthSummary, OverallHealth, RecentActivity, SensorCounts, SensorHealth, SensorSnapshot,
        SystemStatus,
    },
    store::{AlertStats, CommandCounts, SortOrder},
    window::TimeWindow,
};

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        sensors::create_reading,
        sensors::list_readings,
        sensors::latest_readings,
        sensors::latest_for_type,
        alerts::list_alerts,
        alerts::alert_stats,
        alerts::bulk_acknowledge,
        alerts::get_alert,
        alerts::acknowledge_alert,
        alerts::resolve_alert,
        alerts::reactivate_alert,
        alerts::mark_false_alarm,
        commands::enqueue_command,
        commands::active_commands,
        commands::command_stats,
        commands::get_command,
        commands::update_command_status,
        commands::cancel_command,
        commands::device_history,
        commands::device_pending,
        commands::device_last,
        system::system_status,
        system::health_summary,
        system::health,
    ),
    components(schemas(
        SensorType, ReadingStatus, SensorReadingDto, CreateReadingRequest, CreateReadingResponse,
        LatestReadingDto, LatestStatus, ReadingPageDto, SortOrder,
        AlertSeverity, AlertStatus, AlertDto, AlertPageDto, ActorRequest, BulkAcknowledgeRequest,
        BulkAcknowledgeResponse, ResolveRequest, AlertStats, alerts::AlertStatsResponse, TimeWindow,
        DeviceType, CommandAction, CommandStatus, CommandSource, CommandParameters, CommandRequest,
        ParametersRequest, CommandDto, StatusUpdate, CancelRequest, CommandCounts, CommandHistoryDto,
        CommandStats, DeviceTypeStats, CommandStatEntry,
        SystemStatus, HealthSummary, OverallHealth, SensorHealth, SensorSnapshot, SensorCounts,
        RecentActivity, HealthResponse, StoreHealth,
    )),
    tags(
        (name = "sensors",  description = "Reading ingestion and queries"),
        (name = "alerts",   description = "Alerts raised by abnormal readings"),
        (name = "commands", description = "Actuator command queue"),
        (name = "devices",  description = "Per-device command views"),
        (name = "system",   description = "Health and status endpoints"),
    ),
    info(
        title = "Environmental Monitoring API",
        version = "0.1.0",
        description = "REST API for sensor readings, alerts and actuator commands"
    )
)]
pub struct ApiDoc;

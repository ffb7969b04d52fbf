use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    db::models::{CommandStatus, ReadingStatus, SensorReading, SensorType},
    sensors::SensorService,
    store::{AlertFilter, Store, StoreResult},
};

const RECENT_ACTIVITY_WINDOW_SECS: i64 = 3600;
pub const ALL_NORMAL: &str = "All systems operating normally";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorHealth {
    Normal,
    Warning,
    Danger,
    Unknown,
    /// No reading, a failed lookup, or a reading older than the staleness
    /// threshold.
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SensorSnapshot {
    pub sensor_type: SensorType,
    pub status: SensorHealth,
    pub value: Option<f64>,
    pub device_id: Option<String>,
    pub last_reading_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SensorCounts {
    pub critical_sensors: u32,
    pub warning_sensors: u32,
    pub offline_sensors: u32,
    pub unknown_sensors: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecentActivity {
    pub window_secs: i64,
    /// `None` when the count could not be read.
    pub readings: Option<u64>,
    pub alerts: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SystemStatus {
    pub overall_health: OverallHealth,
    #[serde(flatten)]
    pub counts: SensorCounts,
    pub sensors: Vec<SensorSnapshot>,
    pub unacknowledged_alerts: Option<u64>,
    pub pending_commands: Option<u64>,
    pub recent_activity: RecentActivity,
    pub recommendations: Vec<String>,
    pub store_backend: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HealthSummary {
    pub overall_health: OverallHealth,
    #[serde(flatten)]
    pub counts: SensorCounts,
    pub unacknowledged_alerts: Option<u64>,
    pub generated_at: DateTime<Utc>,
}

/// Combines the latest reading of every sensor type with alert and command
/// counts into a dashboard view. Lookups run concurrently and never fail
/// the whole report.
#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn Store>,
    sensors: SensorService,
    stale_after: Duration,
}

impl StatusService {
    pub fn new(store: Arc<dyn Store>, sensors: SensorService, stale_after: Duration) -> Self {
        Self {
            store,
            sensors,
            stale_after,
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        let now = Utc::now();
        let recent = now - Duration::seconds(RECENT_ACTIVITY_WINDOW_SECS);
        let unacked = AlertFilter::unacknowledged();
        let recent_alerts = AlertFilter::since(recent);

        let (latest, unacknowledged, pending, readings, alerts) = tokio::join!(
            self.sensors.latest_per_type(&SensorType::ALL),
            self.store.count_alerts(&unacked),
            self.store.count_commands(Some(CommandStatus::Pending)),
            self.store.count_readings_since(recent),
            self.store.count_alerts(&recent_alerts),
        );

        let sensors = snapshots(&latest, now, self.stale_after);
        let counts = count(&sensors);
        let unacknowledged_alerts = degrade("unacknowledged alerts", unacknowledged);
        let pending_commands = degrade("pending commands", pending);

        SystemStatus {
            overall_health: overall_health(&sensors),
            counts,
            recommendations: recommendations(&counts, unacknowledged_alerts),
            sensors,
            unacknowledged_alerts,
            pending_commands,
            recent_activity: RecentActivity {
                window_secs: RECENT_ACTIVITY_WINDOW_SECS,
                readings: degrade("recent readings", readings),
                alerts: degrade("recent alerts", alerts),
            },
            store_backend: self.store.backend().to_owned(),
            generated_at: now,
        }
    }

    pub async fn health_summary(&self) -> HealthSummary {
        let now = Utc::now();
        let unacked = AlertFilter::unacknowledged();
        let (latest, unacknowledged) = tokio::join!(
            self.sensors.latest_per_type(&SensorType::ALL),
            self.store.count_alerts(&unacked),
        );

        let sensors = snapshots(&latest, now, self.stale_after);
        HealthSummary {
            overall_health: overall_health(&sensors),
            counts: count(&sensors),
            unacknowledged_alerts: degrade("unacknowledged alerts", unacknowledged),
            generated_at: now,
        }
    }
}

fn degrade<T>(what: &str, result: StoreResult<T>) -> Option<T> {
    result
        .map_err(|e| warn!(lookup = what, error = %e, "Status lookup failed"))
        .ok()
}

fn snapshots(
    latest: &[(SensorType, Option<SensorReading>)],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Vec<SensorSnapshot> {
    latest
        .iter()
        .map(|(sensor_type, reading)| snapshot(*sensor_type, reading.as_ref(), now, stale_after))
        .collect()
}

pub fn snapshot(
    sensor_type: SensorType,
    reading: Option<&SensorReading>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> SensorSnapshot {
    let Some(reading) = reading else {
        return SensorSnapshot {
            sensor_type,
            status: SensorHealth::Offline,
            value: None,
            device_id: None,
            last_reading_at: None,
        };
    };

    let status = if now - reading.recorded_at > stale_after {
        SensorHealth::Offline
    } else {
        match reading.status {
            ReadingStatus::Normal => SensorHealth::Normal,
            ReadingStatus::Warning => SensorHealth::Warning,
            ReadingStatus::Danger => SensorHealth::Danger,
            ReadingStatus::Unknown => SensorHealth::Unknown,
        }
    };

    SensorSnapshot {
        sensor_type,
        status,
        value: reading.value,
        device_id: Some(reading.device_id.clone()),
        last_reading_at: Some(reading.recorded_at),
    }
}

/// Worst state wins: danger, then warning, then anything indeterminate.
pub fn overall_health(sensors: &[SensorSnapshot]) -> OverallHealth {
    sensors
        .iter()
        .map(|s| match s.status {
            SensorHealth::Danger => OverallHealth::Critical,
            SensorHealth::Warning => OverallHealth::Warning,
            SensorHealth::Offline | SensorHealth::Unknown => OverallHealth::Degraded,
            SensorHealth::Normal => OverallHealth::Healthy,
        })
        .max()
        .unwrap_or(OverallHealth::Healthy)
}

fn count(sensors: &[SensorSnapshot]) -> SensorCounts {
    let mut counts = SensorCounts::default();
    for s in sensors {
        match s.status {
            SensorHealth::Danger => counts.critical_sensors += 1,
            SensorHealth::Warning => counts.warning_sensors += 1,
            SensorHealth::Offline => counts.offline_sensors += 1,
            SensorHealth::Unknown => counts.unknown_sensors += 1,
            SensorHealth::Normal => {}
        }
    }
    counts
}

pub fn recommendations(counts: &SensorCounts, unacknowledged_alerts: Option<u64>) -> Vec<String> {
    let mut out = Vec::new();
    if counts.critical_sensors > 0 {
        out.push(format!(
            "{} sensor(s) at dangerous levels: take immediate action",
            counts.critical_sensors
        ));
    }
    if counts.warning_sensors > 0 {
        out.push(format!(
            "{} sensor(s) at warning levels: monitor closely",
            counts.warning_sensors
        ));
    }
    if counts.offline_sensors > 0 {
        out.push(format!(
            "{} sensor(s) offline: check connectivity and power",
            counts.offline_sensors
        ));
    }
    if counts.unknown_sensors > 0 {
        out.push(format!(
            "{} sensor(s) reporting unreadable values: check calibration",
            counts.unknown_sensors
        ));
    }
    if let Some(n) = unacknowledged_alerts.filter(|&n| n > 0) {
        out.push(format!("{n} unacknowledged alert(s) need review"));
    }
    if out.is_empty() {
        out.push(ALL_NORMAL.to_owned());
    }
    out
}

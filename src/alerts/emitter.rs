use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Alert, AlertSeverity, AlertStatus, ReadingStatus, SensorReading, SensorType};

pub const DEFAULT_LOCATION: &str = "unknown";

/// Severity of the alert raised for a reading, or `None` when the reading
/// must not raise one (normal and unknown readings).
pub fn severity_for(sensor_type: SensorType, status: ReadingStatus) -> Option<AlertSeverity> {
    match (sensor_type, status) {
        (SensorType::Fire, ReadingStatus::Danger) => Some(AlertSeverity::Critical),
        (_, ReadingStatus::Danger) => Some(AlertSeverity::High),
        (_, ReadingStatus::Warning) => Some(AlertSeverity::Medium),
        (_, ReadingStatus::Normal | ReadingStatus::Unknown) => None,
    }
}

/// Human-readable alert text, e.g. `GAS Sensor detected DANGEROUS level (350)`.
pub fn alert_message(sensor_type: SensorType, value: Option<f64>, status: ReadingStatus) -> String {
    let name = sensor_type.as_str().to_uppercase();
    let value = value.map_or_else(|| "n/a".to_owned(), |v| v.to_string());
    match status {
        ReadingStatus::Danger => format!("{name} Sensor detected DANGEROUS level ({value})"),
        _ => format!("{name} Sensor WARNING level ({value})"),
    }
}

/// Build the alert for `reading`, or `None` when its status is not abnormal.
/// Every abnormal reading yields its own alert; nothing is deduplicated.
pub fn alert_for(reading: &SensorReading, now: DateTime<Utc>) -> Option<Alert> {
    let severity = severity_for(reading.sensor_type, reading.status)?;

    Some(Alert {
        id: Uuid::new_v4(),
        sensor_type: reading.sensor_type,
        sensor_value: reading.value,
        device_id: reading.device_id.clone(),
        location: DEFAULT_LOCATION.to_owned(),
        message: alert_message(reading.sensor_type, reading.value, reading.status),
        severity,
        status: AlertStatus::Active,
        acknowledged: false,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved: false,
        resolved_at: None,
        resolution_notes: None,
        expires_at: None,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor_type: SensorType, value: f64, status: ReadingStatus) -> SensorReading {
        let now = Utc::now();
        SensorReading {
            id: Uuid::new_v4(),
            device_id: "esp32-kitchen".into(),
            sensor_type,
            value: Some(value),
            status,
            recorded_at: now,
            created_at: now,
        }
    }

    #[test]
    fn danger_reading_raises_active_unacknowledged_alert() {
        let r = reading(SensorType::Gas, 350.0, ReadingStatus::Danger);
        let alert = alert_for(&r, Utc::now()).unwrap();
        assert_eq!(alert.sensor_type, SensorType::Gas);
        assert_eq!(alert.sensor_value, Some(350.0));
        assert_eq!(alert.device_id, "esp32-kitchen");
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(!alert.acknowledged);
        assert_eq!(alert.message, "GAS Sensor detected DANGEROUS level (350)");
    }

    #[test]
    fn warning_reading_message() {
        let r = reading(SensorType::Humidity, 72.5, ReadingStatus::Warning);
        let alert = alert_for(&r, Utc::now()).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert_eq!(alert.message, "HUMIDITY Sensor WARNING level (72.5)");
    }

    #[test]
    fn fire_danger_is_critical() {
        assert_eq!(
            severity_for(SensorType::Fire, ReadingStatus::Danger),
            Some(AlertSeverity::Critical)
        );
    }

    #[test]
    fn normal_and_unknown_raise_nothing() {
        for t in SensorType::ALL {
            assert!(severity_for(t, ReadingStatus::Normal).is_none());
            assert!(severity_for(t, ReadingStatus::Unknown).is_none());
        }
        let r = reading(SensorType::Gas, 10.0, ReadingStatus::Normal);
        assert!(alert_for(&r, Utc::now()).is_none());
    }
}

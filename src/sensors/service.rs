use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    alerts::emitter,
    db::models::{Alert, SensorReading, SensorType},
    error::{Result, ServiceError},
    sensors::classifier,
    store::{Page, Pagination, ReadingFilter, SortOrder, Store},
};

pub const DEFAULT_DEVICE_ID: &str = "default";
const MAX_DEVICE_ID_LEN: usize = 64;
/// How far ahead of server time a device clock may run.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// An inbound reading after wire-level decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub sensor_type: SensorType,
    /// `None` when the device explicitly reported `null`.
    pub value: Option<f64>,
    pub device_id: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Result of `SensorService::record`: the stored reading and the alert it
/// raised, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedReading {
    pub reading: SensorReading,
    pub alert: Option<Alert>,
}

#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn Store>,
}

impl SensorService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Classifies `new`, persists it and, for warning/danger readings, raises
    /// exactly one alert.
    pub async fn record(&self, new: NewReading) -> Result<RecordedReading> {
        let device_id = normalize_device_id(new.device_id)?;
        if new.value.is_some_and(|v| !v.is_finite()) {
            return Err(ServiceError::validation("value must be a finite number"));
        }

        let now = Utc::now();
        if let Some(at) = new.recorded_at {
            if at - now > chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
                return Err(ServiceError::validation(
                    "recorded_at must not be in the future",
                ));
            }
        }
        let status = classifier::classify(Some(new.sensor_type), new.value);
        let reading = SensorReading {
            id: Uuid::new_v4(),
            device_id,
            sensor_type: new.sensor_type,
            value: new.value,
            status,
            recorded_at: new.recorded_at.unwrap_or(now),
            created_at: now,
        };

        let alert = emitter::alert_for(&reading, now);
        self.store
            .insert_reading_with_alert(&reading, alert.as_ref())
            .await?;
        info!(
            sensor_type = %reading.sensor_type,
            device_id = %reading.device_id,
            value = ?reading.value,
            status = %reading.status,
            "Reading recorded"
        );
        if let Some(alert) = &alert {
            warn!(
                alert_id = %alert.id,
                sensor_type = %alert.sensor_type,
                device_id = %alert.device_id,
                severity = ?alert.severity,
                "{}",
                alert.message
            );
        }

        Ok(RecordedReading { reading, alert })
    }

    pub async fn latest_by_type(&self, sensor_type: SensorType) -> Result<Option<SensorReading>> {
        Ok(self.store.latest_reading(sensor_type).await?)
    }

    /// Latest reading for each of `types`, fetched concurrently.
    ///
    /// Never fails as a whole: a type with no data, or whose lookup failed,
    /// yields `None`.
    pub async fn latest_per_type(
        &self,
        types: &[SensorType],
    ) -> Vec<(SensorType, Option<SensorReading>)> {
        let lookups = types.iter().map(|&t| async move {
            match self.store.latest_reading(t).await {
                Ok(reading) => (t, reading),
                Err(e) => {
                    warn!(sensor_type = %t, error = %e, "Latest reading lookup failed");
                    (t, None)
                }
            }
        });
        join_all(lookups).await
    }

    pub async fn query(
        &self,
        filter: &ReadingFilter,
        order: SortOrder,
        page: Pagination,
    ) -> Result<Page<SensorReading>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(ServiceError::validation("`from` must not be after `to`"));
            }
        }
        Ok(self.store.query_readings(filter, order, page).await?)
    }
}

fn normalize_device_id(device_id: Option<String>) -> Result<String> {
    let id = device_id
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_owned());
    if id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(ServiceError::validation(format!(
            "device_id must be at most {MAX_DEVICE_ID_LEN} characters"
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        db::models::{AlertSeverity, ReadingStatus},
        store::{AlertFilter, AlertStore, MemoryStore, ReadingStore},
    };

    fn service() -> (SensorService, MemoryStore) {
        let store = MemoryStore::new();
        (SensorService::new(Arc::new(store.clone())), store)
    }

    fn new_reading(sensor_type: SensorType, value: f64) -> NewReading {
        NewReading {
            sensor_type,
            value: Some(value),
            device_id: None,
            recorded_at: None,
        }
    }

    async fn alert_count(store: &MemoryStore) -> u64 {
        store.count_alerts(&AlertFilter::default()).await.unwrap()
    }

    #[tokio::test]
    async fn failed_alert_write_leaves_no_reading_behind() {
        let (svc, store) = service();
        store.set_alert_writes_available(false);

        let err = svc.record(new_reading(SensorType::Gas, 350.0)).await.unwrap_err();
        assert_eq!(err.kind(), "storage_unavailable");
        assert!(store.latest_reading(SensorType::Gas).await.unwrap().is_none());

        // normal readings raise no alert and still go through
        svc.record(new_reading(SensorType::Gas, 50.0)).await.unwrap();
        assert_eq!(alert_count(&store).await, 0);
        assert!(store.latest_reading(SensorType::Gas).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn future_timestamps_are_rejected() {
        let (svc, store) = service();
        let err = svc
            .record(NewReading {
                recorded_at: Some(Utc::now() + Duration::days(365)),
                ..new_reading(SensorType::Temperature, 60.0)
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(alert_count(&store).await, 0);

        // small device clock drift is tolerated
        svc.record(NewReading {
            recorded_at: Some(Utc::now() + Duration::seconds(30)),
            ..new_reading(SensorType::Temperature, 20.0)
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn latest_follows_arrival_order() {
        let (svc, _) = service();
        svc.record(NewReading {
            recorded_at: Some(Utc::now() + Duration::seconds(200)),
            ..new_reading(SensorType::Temperature, 60.0)
        })
        .await
        .unwrap();
        svc.record(new_reading(SensorType::Temperature, 20.0)).await.unwrap();

        let latest = svc.latest_by_type(SensorType::Temperature).await.unwrap().unwrap();
        assert_eq!(latest.value, Some(20.0));
    }

    #[tokio::test]
    async fn danger_reading_creates_exactly_one_alert() {
        let (svc, store) = service();
        let out = svc.record(new_reading(SensorType::Gas, 350.0)).await.unwrap();

        assert_eq!(out.reading.status, ReadingStatus::Danger);
        assert_eq!(out.reading.device_id, DEFAULT_DEVICE_ID);
        let alert = out.alert.unwrap();
        assert_eq!(alert.sensor_type, SensorType::Gas);
        assert_eq!(alert.sensor_value, Some(350.0));
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert_count(&store).await, 1);
    }

    #[tokio::test]
    async fn warning_reading_creates_alert() {
        let (svc, store) = service();
        let out = svc
            .record(new_reading(SensorType::Vibration, 1.0))
            .await
            .unwrap();
        assert_eq!(out.reading.status, ReadingStatus::Warning);
        assert!(out.alert.is_some());
        assert_eq!(alert_count(&store).await, 1);
    }

    #[tokio::test]
    async fn normal_reading_never_creates_alert() {
        let (svc, store) = service();
        for (t, v) in [
            (SensorType::Gas, 120.0),
            (SensorType::Temperature, 22.0),
            (SensorType::Humidity, 40.0),
            (SensorType::Fire, 0.0),
            (SensorType::Vibration, 0.0),
        ] {
            let out = svc.record(new_reading(t, v)).await.unwrap();
            assert_eq!(out.reading.status, ReadingStatus::Normal);
            assert!(out.alert.is_none());
        }
        assert_eq!(alert_count(&store).await, 0);
    }

    #[tokio::test]
    async fn null_value_is_stored_as_unknown_without_alert() {
        let (svc, store) = service();
        let out = svc
            .record(NewReading {
                value: None,
                ..new_reading(SensorType::Temperature, 0.0)
            })
            .await
            .unwrap();
        assert_eq!(out.reading.status, ReadingStatus::Unknown);
        assert!(out.reading.value.is_none());
        assert_eq!(alert_count(&store).await, 0);
    }

    #[tokio::test]
    async fn repeated_abnormal_readings_each_raise_an_alert() {
        let (svc, store) = service();
        for _ in 0..3 {
            svc.record(new_reading(SensorType::Fire, 1.0)).await.unwrap();
        }
        assert_eq!(alert_count(&store).await, 3);
    }

    #[tokio::test]
    async fn device_id_and_timestamp_are_kept() {
        let (svc, _) = service();
        let at = Utc::now() - Duration::minutes(3);
        let out = svc
            .record(NewReading {
                device_id: Some("  esp32-lab ".into()),
                recorded_at: Some(at),
                ..new_reading(SensorType::Humidity, 55.0)
            })
            .await
            .unwrap();
        assert_eq!(out.reading.device_id, "esp32-lab");
        assert_eq!(out.reading.recorded_at, at);
    }

    #[tokio::test]
    async fn overlong_device_id_is_rejected() {
        let (svc, _) = service();
        let err = svc
            .record(NewReading {
                device_id: Some("x".repeat(65)),
                ..new_reading(SensorType::Gas, 10.0)
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn storage_outage_is_surfaced() {
        let (svc, store) = service();
        store.set_available(false);
        let err = svc
            .record(new_reading(SensorType::Gas, 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn latest_per_type_fills_missing_types_with_none() {
        let (svc, _) = service();
        svc.record(new_reading(SensorType::Gas, 100.0)).await.unwrap();
        svc.record(new_reading(SensorType::Gas, 200.0)).await.unwrap();

        let latest = svc.latest_per_type(&SensorType::ALL).await;
        assert_eq!(latest.len(), 5);
        assert_eq!(latest[0].0, SensorType::Gas);
        assert_eq!(latest[0].1.as_ref().unwrap().value, Some(200.0));
        assert!(latest[1..].iter().all(|(_, r)| r.is_none()));
    }

    #[tokio::test]
    async fn latest_per_type_is_idempotent() {
        let (svc, _) = service();
        svc.record(new_reading(SensorType::Temperature, 25.0)).await.unwrap();
        let first = svc.latest_per_type(&SensorType::ALL).await;
        let second = svc.latest_per_type(&SensorType::ALL).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn latest_per_type_degrades_on_outage() {
        let (svc, store) = service();
        svc.record(new_reading(SensorType::Gas, 100.0)).await.unwrap();
        store.set_available(false);
        let latest = svc.latest_per_type(&SensorType::ALL).await;
        assert!(latest.iter().all(|(_, r)| r.is_none()));
    }

    #[tokio::test]
    async fn query_filters_by_status() {
        let (svc, _) = service();
        svc.record(new_reading(SensorType::Gas, 100.0)).await.unwrap();
        svc.record(new_reading(SensorType::Gas, 400.0)).await.unwrap();
        svc.record(new_reading(SensorType::Temperature, 45.0)).await.unwrap();

        let filter = ReadingFilter {
            status: Some(ReadingStatus::Danger),
            ..ReadingFilter::default()
        };
        let page = svc
            .query(&filter, SortOrder::NewestFirst, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].value, Some(400.0));
    }

    #[tokio::test]
    async fn query_rejects_inverted_range() {
        let (svc, _) = service();
        let now = Utc::now();
        let filter = ReadingFilter {
            from: Some(now),
            to: Some(now - Duration::hours(1)),
            ..ReadingFilter::default()
        };
        let err = svc
            .query(&filter, SortOrder::NewestFirst, Pagination::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}

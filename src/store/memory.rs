use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ActiveCommandFilter, AlertFilter, AlertStats, AlertStore, CommandCounts, CommandStatRow,
    CommandStore, Page, Pagination, ReadingFilter, ReadingStore, SortOrder, Store, StoreResult,
    EXPIRED_MESSAGE,
};
use crate::{
    db::models::{
        Alert, AlertSeverity, AlertTransition, CommandAction, CommandStatus, CommandTransition,
        DeviceCommand, DeviceType, SensorReading, SensorType,
    },
    error::StoreError,
};

#[derive(Default)]
struct Collections {
    // Insertion order is kept so equal timestamps still sort deterministically.
    readings: Vec<SensorReading>,
    alerts: Vec<Alert>,
    commands: Vec<DeviceCommand>,
}

/// In-memory store backed by `tokio::sync::RwLock`.
///
/// Cheap to clone; clones share state. `set_available(false)` makes every
/// operation fail with `StoreError::Unavailable`, which is how tests exercise
/// degraded mode.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
    available: Arc<AtomicBool>,
    alert_writes: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
            alert_writes: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes alert inserts fail while everything else keeps working.
    #[cfg(test)]
    pub fn set_alert_writes_available(&self, available: bool) {
        self.alert_writes.store(available, Ordering::SeqCst);
    }

    fn check_alert_writes(&self) -> StoreResult<()> {
        if self.alert_writes.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("alert table is offline".into()))
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".into()))
        }
    }
}

/// Sort `items` by `key` in `order`, keeping newer insertions first on ties
/// when newest-first was requested, then cut out `page`.
fn paginate<T, K, F>(items: Vec<&T>, order: SortOrder, page: Pagination, key: F) -> Page<T>
where
    T: Clone,
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut items = items;
    match order {
        SortOrder::NewestFirst => {
            items.reverse();
            items.sort_by(|a, b| key(b).cmp(&key(a)));
        }
        SortOrder::OldestFirst => items.sort_by_key(|a| key(a)),
    }

    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect();

    Page {
        total,
        page: page.page,
        limit: page.limit,
        items,
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert_reading(&self, reading: &SensorReading) -> StoreResult<()> {
        self.check()?;
        self.inner.write().await.readings.push(reading.clone());
        Ok(())
    }

    async fn insert_reading_with_alert(
        &self,
        reading: &SensorReading,
        alert: Option<&Alert>,
    ) -> StoreResult<()> {
        self.check()?;
        if alert.is_some() {
            self.check_alert_writes()?;
        }
        let mut guard = self.inner.write().await;
        guard.readings.push(reading.clone());
        if let Some(alert) = alert {
            guard.alerts.push(alert.clone());
        }
        Ok(())
    }

    async fn latest_reading(&self, sensor_type: SensorType) -> StoreResult<Option<SensorReading>> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.sensor_type == sensor_type)
            // max_by_key keeps the last maximum, i.e. the newest insertion.
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn query_readings(
        &self,
        filter: &ReadingFilter,
        order: SortOrder,
        page: Pagination,
    ) -> StoreResult<Page<SensorReading>> {
        self.check()?;
        let guard = self.inner.read().await;
        let matching = guard.readings.iter().filter(|r| filter.matches(r)).collect();
        Ok(paginate(matching, order, page, |r| r.recorded_at))
    }

    async fn count_readings_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        self.check()?;
        let guard = self.inner.read().await;
        Ok(guard
            .readings
            .iter()
            .filter(|r| r.created_at >= since)
            .count() as u64)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.check()?;
        self.check_alert_writes()?;
        self.inner.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<Alert>> {
        self.check()?;
        let guard = self.inner.read().await;
        Ok(guard.alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        order: SortOrder,
        page: Pagination,
    ) -> StoreResult<Page<Alert>> {
        self.check()?;
        let guard = self.inner.read().await;
        let matching = guard.alerts.iter().filter(|a| filter.matches(a)).collect();
        Ok(paginate(matching, order, page, |a| a.created_at))
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64> {
        self.check()?;
        let guard = self.inner.read().await;
        Ok(guard.alerts.iter().filter(|a| filter.matches(a)).count() as u64)
    }

    async fn transition_alert(
        &self,
        id: Uuid,
        transition: &AlertTransition,
    ) -> StoreResult<Option<Alert>> {
        self.check()?;
        let mut guard = self.inner.write().await;
        Ok(guard.alerts.iter_mut().find(|a| a.id == id).map(|a| {
            a.apply(transition);
            a.clone()
        }))
    }

    async fn acknowledge_alerts(
        &self,
        ids: &[Uuid],
        by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.check()?;
        let transition = AlertTransition::Acknowledge { by: by.to_owned(), at };
        let mut guard = self.inner.write().await;
        let mut modified = 0;
        for alert in guard
            .alerts
            .iter_mut()
            .filter(|a| !a.acknowledged && ids.contains(&a.id))
        {
            alert.apply(&transition);
            modified += 1;
        }
        Ok(modified)
    }

    async fn alert_stats(&self, since: DateTime<Utc>) -> StoreResult<AlertStats> {
        self.check()?;
        let guard = self.inner.read().await;
        let mut stats = AlertStats::default();
        for alert in guard.alerts.iter().filter(|a| a.created_at >= since) {
            stats.total += 1;
            if !alert.acknowledged {
                stats.unacknowledged += 1;
            }
            *stats
                .by_severity
                .entry(enum_key(&alert.severity))
                .or_default() += 1;
            *stats
                .by_sensor_type
                .entry(alert.sensor_type.to_string())
                .or_default() += 1;
            *stats.by_status.entry(enum_key(&alert.status)).or_default() += 1;
        }
        Ok(stats)
    }

    async fn purge_alerts(
        &self,
        resolved_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.check()?;
        let mut guard = self.inner.write().await;
        let before = guard.alerts.len();
        guard.alerts.retain(|a| {
            let aged_out = a.resolved && a.resolved_at.is_some_and(|at| at < resolved_before);
            let expired = a.expires_at.is_some_and(|at| at < now);
            a.severity == AlertSeverity::Critical || !(aged_out || expired)
        });
        Ok((before - guard.alerts.len()) as u64)
    }
}

#[async_trait]
impl CommandStore for MemoryStore {
    async fn insert_command(&self, command: &DeviceCommand) -> StoreResult<()> {
        self.check()?;
        self.inner.write().await.commands.push(command.clone());
        Ok(())
    }

    async fn get_command(&self, id: Uuid) -> StoreResult<Option<DeviceCommand>> {
        self.check()?;
        let guard = self.inner.read().await;
        Ok(guard.commands.iter().find(|c| c.id == id).cloned())
    }

    async fn latest_command(&self, device_id: &str) -> StoreResult<Option<DeviceCommand>> {
        self.check()?;
        let guard = self.inner.read().await;
        Ok(guard
            .commands
            .iter()
            .filter(|c| c.device_id == device_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn pending_commands(
        &self,
        device_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>> {
        self.check()?;
        let guard = self.inner.read().await;
        let mut pending: Vec<_> = guard
            .commands
            .iter()
            .filter(|c| c.device_id == device_id && c.status == CommandStatus::Pending)
            .collect();
        pending.sort_by_key(|c| (Reverse(c.parameters.priority), c.created_at));
        Ok(pending.into_iter().take(limit as usize).cloned().collect())
    }

    async fn active_commands(
        &self,
        filter: &ActiveCommandFilter,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>> {
        self.check()?;
        let guard = self.inner.read().await;
        let mut active: Vec<_> = guard.commands.iter().filter(|c| filter.matches(c)).collect();
        active.sort_by_key(|c| (Reverse(c.is_urgent), Reverse(c.parameters.priority), c.created_at));
        Ok(active.into_iter().take(limit as usize).cloned().collect())
    }

    async fn command_history(
        &self,
        device_id: &str,
        status: Option<CommandStatus>,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>> {
        self.check()?;
        let guard = self.inner.read().await;
        let matching = guard
            .commands
            .iter()
            .filter(|c| c.device_id == device_id && status.is_none_or(|s| c.status == s))
            .collect();
        let page = Pagination { page: 1, limit };
        Ok(paginate(matching, SortOrder::NewestFirst, page, |c| c.created_at).items)
    }

    async fn command_counts(&self, device_id: &str) -> StoreResult<CommandCounts> {
        self.check()?;
        let guard = self.inner.read().await;
        let mut counts = CommandCounts::default();
        for c in guard.commands.iter().filter(|c| c.device_id == device_id) {
            counts.total += 1;
            match c.status {
                CommandStatus::Completed => counts.completed += 1,
                CommandStatus::Pending => counts.pending += 1,
                CommandStatus::Failed => counts.failed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn count_commands(&self, status: Option<CommandStatus>) -> StoreResult<u64> {
        self.check()?;
        let guard = self.inner.read().await;
        Ok(guard
            .commands
            .iter()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .count() as u64)
    }

    async fn transition_command(
        &self,
        id: Uuid,
        expected: CommandStatus,
        transition: &CommandTransition,
    ) -> StoreResult<Option<DeviceCommand>> {
        self.check()?;
        let mut guard = self.inner.write().await;
        Ok(guard
            .commands
            .iter_mut()
            .find(|c| c.id == id && c.status == expected)
            .map(|c| {
                c.apply(transition);
                c.clone()
            }))
    }

    async fn expire_pending(
        &self,
        now: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> StoreResult<u64> {
        self.check()?;
        let transition = CommandTransition {
            error_message: Some(EXPIRED_MESSAGE.to_owned()),
            ..CommandTransition::to(CommandStatus::Cancelled, now)
        };
        let mut guard = self.inner.write().await;
        let mut cancelled = 0;
        for c in guard.commands.iter_mut().filter(|c| {
            c.status == CommandStatus::Pending
                && c.is_expired(now)
                && device_id.is_none_or(|d| c.device_id == d)
        }) {
            c.apply(&transition);
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn command_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<CommandStatRow>> {
        self.check()?;
        let guard = self.inner.read().await;

        // (count, summed response ms, measured samples)
        let mut buckets: HashMap<(DeviceType, CommandAction, CommandStatus), (u64, f64, u64)> =
            HashMap::new();
        for c in guard.commands.iter().filter(|c| c.created_at >= since) {
            let bucket = buckets
                .entry((c.device_type, c.command, c.status))
                .or_default();
            bucket.0 += 1;
            if let (Some(sent), Some(done)) = (c.sent_at, c.completed_at) {
                bucket.1 += (done - sent).num_milliseconds() as f64;
                bucket.2 += 1;
            }
        }

        Ok(buckets
            .into_iter()
            .map(|((device_type, command, status), (count, sum, samples))| CommandStatRow {
                device_type,
                command,
                status,
                count,
                avg_response_ms: (samples > 0).then(|| sum / samples as f64),
            })
            .collect())
    }

    async fn purge_commands(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        self.check()?;
        let mut guard = self.inner.write().await;
        let len = guard.commands.len();
        guard
            .commands
            .retain(|c| !(c.status.is_terminal() && c.created_at < before));
        Ok((len - guard.commands.len()) as u64)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// snake_case name of a unit enum variant, as it appears on the wire.
fn enum_key<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

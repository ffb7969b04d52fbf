//! Persistence seam for readings, alerts and device commands.
//!
//! Implementations:
//! - `PgStore`: production PostgreSQL backend
//! - `MemoryStore`: in-process backend for tests and database-less runs

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{
        Alert, AlertSeverity, AlertStatus, AlertTransition, CommandAction, CommandStatus,
        CommandTransition, DeviceCommand, DeviceType, ReadingStatus, SensorReading, SensorType,
    },
    error::{ServiceError, StoreError},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Paging and filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Result<Self, ServiceError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT);
        if page == 0 {
            return Err(ServiceError::validation("page must be at least 1"));
        }
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(ServiceError::validation(format!(
                "limit must be between 1 and {}",
                Self::MAX_LIMIT
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Number of matching records across all pages.
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            page: self.page,
            limit: self.limit,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "desc")]
    NewestFirst,
    #[serde(rename = "asc")]
    OldestFirst,
}

impl SortOrder {
    pub fn sql(self) -> &'static str {
        match self {
            SortOrder::NewestFirst => "DESC",
            SortOrder::OldestFirst => "ASC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub sensor_type: Option<SensorType>,
    pub status: Option<ReadingStatus>,
    pub device_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReadingFilter {
    pub fn matches(&self, r: &SensorReading) -> bool {
        self.sensor_type.is_none_or(|t| r.sensor_type == t)
            && self.status.is_none_or(|s| r.status == s)
            && self.device_id.as_deref().is_none_or(|d| r.device_id == d)
            && self.from.is_none_or(|from| r.recorded_at >= from)
            && self.to.is_none_or(|to| r.recorded_at <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub acknowledged: Option<bool>,
    pub severity: Option<AlertSeverity>,
    pub status: Option<AlertStatus>,
    pub sensor_type: Option<SensorType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AlertFilter {
    pub fn unacknowledged() -> Self {
        Self {
            acknowledged: Some(false),
            ..Self::default()
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            ..Self::default()
        }
    }

    pub fn matches(&self, a: &Alert) -> bool {
        self.acknowledged.is_none_or(|ack| a.acknowledged == ack)
            && self.severity.is_none_or(|s| a.severity == s)
            && self.status.is_none_or(|s| a.status == s)
            && self.sensor_type.is_none_or(|t| a.sensor_type == t)
            && self.from.is_none_or(|from| a.created_at >= from)
            && self.to.is_none_or(|to| a.created_at <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveCommandFilter {
    pub device_type: Option<DeviceType>,
    pub location: Option<String>,
}

impl ActiveCommandFilter {
    pub fn matches(&self, c: &DeviceCommand) -> bool {
        matches!(
            c.status,
            CommandStatus::Pending | CommandStatus::Sent | CommandStatus::Executing
        ) && self.device_type.is_none_or(|t| c.device_type == t)
            && self.location.as_deref().is_none_or(|l| c.location == l)
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AlertStats {
    pub total: u64,
    pub unacknowledged: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_sensor_type: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CommandCounts {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
    pub failed: u64,
}

/// One `(device_type, command, status)` bucket of command statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStatRow {
    pub device_type: DeviceType,
    pub command: CommandAction,
    pub status: CommandStatus,
    pub count: u64,
    /// Mean `sent_at → completed_at` in milliseconds, when measurable.
    pub avg_response_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert_reading(&self, reading: &SensorReading) -> StoreResult<()>;

    /// Stores `reading` and the alert it raised as one unit: either both are
    /// persisted or neither is.
    async fn insert_reading_with_alert(
        &self,
        reading: &SensorReading,
        alert: Option<&Alert>,
    ) -> StoreResult<()>;

    /// Most recent reading of `sensor_type` by ingestion time.
    async fn latest_reading(&self, sensor_type: SensorType) -> StoreResult<Option<SensorReading>>;

    async fn query_readings(
        &self,
        filter: &ReadingFilter,
        order: SortOrder,
        page: Pagination,
    ) -> StoreResult<Page<SensorReading>>;

    async fn count_readings_since(&self, since: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()>;

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<Alert>>;

    /// Ordered by `created_at` in `order`.
    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        order: SortOrder,
        page: Pagination,
    ) -> StoreResult<Page<Alert>>;

    async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64>;

    /// Atomically apply `transition`; `None` when the alert does not exist.
    async fn transition_alert(
        &self,
        id: Uuid,
        transition: &AlertTransition,
    ) -> StoreResult<Option<Alert>>;

    /// Acknowledge every unacknowledged alert among `ids`; unknown ids are
    /// skipped. Returns the number of alerts changed.
    async fn acknowledge_alerts(&self, ids: &[Uuid], by: &str, at: DateTime<Utc>)
        -> StoreResult<u64>;

    async fn alert_stats(&self, since: DateTime<Utc>) -> StoreResult<AlertStats>;

    /// Delete non-critical alerts resolved before `resolved_before` or whose
    /// `expires_at` is earlier than `now`.
    async fn purge_alerts(
        &self,
        resolved_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn insert_command(&self, command: &DeviceCommand) -> StoreResult<()>;

    async fn get_command(&self, id: Uuid) -> StoreResult<Option<DeviceCommand>>;

    async fn latest_command(&self, device_id: &str) -> StoreResult<Option<DeviceCommand>>;

    /// Pending commands for `device_id`, priority descending then FIFO.
    async fn pending_commands(&self, device_id: &str, limit: u32)
        -> StoreResult<Vec<DeviceCommand>>;

    /// Pending/sent/executing commands, urgent first, then priority, then FIFO.
    async fn active_commands(
        &self,
        filter: &ActiveCommandFilter,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>>;

    /// Newest first.
    async fn command_history(
        &self,
        device_id: &str,
        status: Option<CommandStatus>,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>>;

    async fn command_counts(&self, device_id: &str) -> StoreResult<CommandCounts>;

    async fn count_commands(&self, status: Option<CommandStatus>) -> StoreResult<u64>;

    /// Compare-and-set: applies `transition` only while the command is still
    /// in `expected`. `None` when the command is missing or has moved on.
    async fn transition_command(
        &self,
        id: Uuid,
        expected: CommandStatus,
        transition: &CommandTransition,
    ) -> StoreResult<Option<DeviceCommand>>;

    /// Cancel pending commands whose `expires_at` has passed, optionally for
    /// a single device. Returns the number cancelled.
    async fn expire_pending(&self, now: DateTime<Utc>, device_id: Option<&str>)
        -> StoreResult<u64>;

    async fn command_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<CommandStatRow>>;

    /// Delete terminal commands created before `before`.
    async fn purge_commands(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

/// The single store handle injected into every service.
#[async_trait]
pub trait Store: ReadingStore + AlertStore + CommandStore {
    /// Cheap reachability probe; never errors.
    async fn is_available(&self) -> bool;

    fn backend(&self) -> &'static str;
}

/// Message stored on pending commands cancelled by expiry.
pub const EXPIRED_MESSAGE: &str = "expired before execution";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let p = Pagination::new(None, None).unwrap();
        assert_eq!(p, Pagination { page: 1, limit: 50 });
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn pagination_offset() {
        let p = Pagination::new(Some(3), Some(20)).unwrap();
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn pagination_rejects_zero_page_and_oversized_limit() {
        assert!(matches!(
            Pagination::new(Some(0), None),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            Pagination::new(None, Some(0)),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            Pagination::new(None, Some(501)),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn sort_order_parses_asc_desc() {
        let o: SortOrder = serde_json::from_str("\"asc\"").unwrap();
        assert_eq!(o, SortOrder::OldestFirst);
        assert_eq!(SortOrder::default().sql(), "DESC");
    }
}

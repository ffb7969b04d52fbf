use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{
    ActiveCommandFilter, AlertFilter, AlertStats, AlertStore, CommandCounts, CommandStatRow,
    CommandStore, Page, Pagination, ReadingFilter, ReadingStore, SortOrder, Store, StoreResult,
    EXPIRED_MESSAGE,
};
use crate::db::models::{
    Alert, AlertTransition, CommandAction, CommandStatus, CommandTransition, DeviceCommand,
    DeviceType, SensorReading, SensorType,
};

const READING_COLUMNS: &str = "id, device_id, sensor_type, value, status, recorded_at, created_at";

const ALERT_COLUMNS: &str = "id, sensor_type, sensor_value, device_id, location, message, \
     severity, status, acknowledged, acknowledged_at, acknowledged_by, resolved, resolved_at, \
     resolution_notes, expires_at, created_at, updated_at";

const COMMAND_COLUMNS: &str = "id, device_id, device_type, location, command, command_value, \
     display_text, duration_ms, frequency, repeat_count, priority, status, sent_at, \
     acknowledged_at, completed_at, device_response, error_code, error_message, source, \
     requested_by, is_urgent, expires_at, metadata, created_at, updated_at";

const READING_FILTER: &str = r#"
    ($1::sensor_type    IS NULL OR sensor_type = $1)
AND ($2::reading_status IS NULL OR status      = $2)
AND ($3::text           IS NULL OR device_id   = $3)
AND ($4::timestamptz    IS NULL OR recorded_at >= $4)
AND ($5::timestamptz    IS NULL OR recorded_at <= $5)
"#;

const ALERT_FILTER: &str = r#"
    ($1::boolean        IS NULL OR acknowledged = $1)
AND ($2::alert_severity IS NULL OR severity     = $2)
AND ($3::alert_status   IS NULL OR status       = $3)
AND ($4::sensor_type    IS NULL OR sensor_type  = $4)
AND ($5::timestamptz    IS NULL OR created_at  >= $5)
AND ($6::timestamptz    IS NULL OR created_at  <= $6)
"#;

/// Stamps acknowledgement fields once; `$2` is the time, `$3` the operator.
/// Right-hand sides see the pre-update row.
const ACKNOWLEDGE_SET: &str = "acknowledged_at = CASE WHEN acknowledged THEN acknowledged_at ELSE $2 END, \
     acknowledged_by = CASE WHEN acknowledged THEN acknowledged_by ELSE $3 END, \
     acknowledged = TRUE";

/// Binds the five `READING_FILTER` parameters in order.
macro_rules! bind_reading_filter {
    ($query:expr, $f:expr) => {
        $query
            .bind($f.sensor_type)
            .bind($f.status)
            .bind($f.device_id.as_deref())
            .bind($f.from)
            .bind($f.to)
    };
}

/// Binds the six `ALERT_FILTER` parameters in order.
macro_rules! bind_alert_filter {
    ($query:expr, $f:expr) => {
        $query
            .bind($f.acknowledged)
            .bind($f.severity)
            .bind($f.status)
            .bind($f.sensor_type)
            .bind($f.from)
            .bind($f.to)
    };
}

/// PostgreSQL store. Every statement is a single atomic row update or insert.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    probe_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, probe_timeout: Duration) -> Self {
        Self {
            pool,
            probe_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct CommandStatRecord {
    device_type: DeviceType,
    command: CommandAction,
    status: CommandStatus,
    count: i64,
    avg_response_ms: Option<f64>,
}

async fn insert_reading_row<'e>(
    executor: impl PgExecutor<'e>,
    reading: &SensorReading,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sensor_readings
            (id, device_id, sensor_type, value, status, recorded_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(reading.id)
    .bind(&reading.device_id)
    .bind(reading.sensor_type)
    .bind(reading.value)
    .bind(reading.status)
    .bind(reading.recorded_at)
    .bind(reading.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_alert_row<'e>(executor: impl PgExecutor<'e>, alert: &Alert) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO alerts (
            id, sensor_type, sensor_value, device_id, location, message,
            severity, status, acknowledged, acknowledged_at, acknowledged_by,
            resolved, resolved_at, resolution_notes, expires_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(alert.id)
    .bind(alert.sensor_type)
    .bind(alert.sensor_value)
    .bind(&alert.device_id)
    .bind(&alert.location)
    .bind(&alert.message)
    .bind(alert.severity)
    .bind(alert.status)
    .bind(alert.acknowledged)
    .bind(alert.acknowledged_at)
    .bind(&alert.acknowledged_by)
    .bind(alert.resolved)
    .bind(alert.resolved_at)
    .bind(&alert.resolution_notes)
    .bind(alert.expires_at)
    .bind(alert.created_at)
    .bind(alert.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn insert_reading(&self, reading: &SensorReading) -> StoreResult<()> {
        insert_reading_row(&self.pool, reading).await
    }

    async fn insert_reading_with_alert(
        &self,
        reading: &SensorReading,
        alert: Option<&Alert>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_reading_row(&mut *tx, reading).await?;
        if let Some(alert) = alert {
            insert_alert_row(&mut *tx, alert).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn latest_reading(&self, sensor_type: SensorType) -> StoreResult<Option<SensorReading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings \
             WHERE sensor_type = $1 \
             ORDER BY created_at DESC \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, SensorReading>(&sql)
            .bind(sensor_type)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn query_readings(
        &self,
        filter: &ReadingFilter,
        order: SortOrder,
        page: Pagination,
    ) -> StoreResult<Page<SensorReading>> {
        let count_sql = format!("SELECT COUNT(*) FROM sensor_readings WHERE {READING_FILTER}");
        let total: i64 = bind_reading_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let dir = order.sql();
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings WHERE {READING_FILTER} \
             ORDER BY recorded_at {dir}, created_at {dir} \
             LIMIT $6 OFFSET $7"
        );
        let items = bind_reading_filter!(sqlx::query_as::<_, SensorReading>(&sql), filter)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            total: total as u64,
            page: page.page,
            limit: page.limit,
            items,
        })
    }

    async fn count_readings_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings WHERE created_at >= $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        insert_alert_row(&self.pool, alert).await
    }

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<Alert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1");
        let row = sqlx::query_as::<_, Alert>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        order: SortOrder,
        page: Pagination,
    ) -> StoreResult<Page<Alert>> {
        let total = self.count_alerts(filter).await?;

        let dir = order.sql();
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE {ALERT_FILTER} \
             ORDER BY created_at {dir}, updated_at {dir} \
             LIMIT $7 OFFSET $8"
        );
        let items = bind_alert_filter!(sqlx::query_as::<_, Alert>(&sql), filter)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            total,
            page: page.page,
            limit: page.limit,
            items,
        })
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM alerts WHERE {ALERT_FILTER}");
        let count: i64 = bind_alert_filter!(sqlx::query_scalar(&sql), filter)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn transition_alert(
        &self,
        id: Uuid,
        transition: &AlertTransition,
    ) -> StoreResult<Option<Alert>> {
        let row = match transition {
            AlertTransition::Acknowledge { by, at } => {
                let sql = format!(
                    "UPDATE alerts SET {ACKNOWLEDGE_SET}, \
                         status = CASE WHEN status = 'active' \
                                  THEN 'acknowledged'::alert_status ELSE status END, \
                         updated_at = $2 \
                     WHERE id = $1 \
                     RETURNING {ALERT_COLUMNS}"
                );
                sqlx::query_as::<_, Alert>(&sql)
                    .bind(id)
                    .bind(*at)
                    .bind(by)
                    .fetch_optional(&self.pool)
                    .await?
            }
            AlertTransition::Resolve { notes, at } => {
                let sql = format!(
                    "UPDATE alerts SET \
                         resolved = TRUE, resolved_at = $2, resolution_notes = $3, \
                         status = 'resolved'::alert_status, \
                         updated_at = $2 \
                     WHERE id = $1 \
                     RETURNING {ALERT_COLUMNS}"
                );
                sqlx::query_as::<_, Alert>(&sql)
                    .bind(id)
                    .bind(*at)
                    .bind(notes.as_deref())
                    .fetch_optional(&self.pool)
                    .await?
            }
            AlertTransition::Reactivate { at } => {
                let sql = format!(
                    "UPDATE alerts SET \
                         status = 'active'::alert_status, \
                         acknowledged = FALSE, acknowledged_at = NULL, acknowledged_by = NULL, \
                         resolved = FALSE, resolved_at = NULL, resolution_notes = NULL, \
                         updated_at = $2 \
                     WHERE id = $1 \
                     RETURNING {ALERT_COLUMNS}"
                );
                sqlx::query_as::<_, Alert>(&sql)
                    .bind(id)
                    .bind(*at)
                    .fetch_optional(&self.pool)
                    .await?
            }
            AlertTransition::FalseAlarm { by, at } => {
                let sql = format!(
                    "UPDATE alerts SET {ACKNOWLEDGE_SET}, \
                         resolved = FALSE, resolved_at = NULL, \
                         status = 'false_alarm'::alert_status, \
                         updated_at = $2 \
                     WHERE id = $1 \
                     RETURNING {ALERT_COLUMNS}"
                );
                sqlx::query_as::<_, Alert>(&sql)
                    .bind(id)
                    .bind(*at)
                    .bind(by)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row)
    }

    async fn acknowledge_alerts(
        &self,
        ids: &[Uuid],
        by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET acknowledged    = TRUE,
                acknowledged_at = $2,
                acknowledged_by = $3,
                status = CASE WHEN status = 'active' THEN 'acknowledged'::alert_status ELSE status END,
                updated_at      = $2
            WHERE id = ANY($1)
              AND NOT acknowledged
            "#,
        )
        .bind(ids)
        .bind(at)
        .bind(by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn alert_stats(&self, since: DateTime<Utc>) -> StoreResult<AlertStats> {
        let (total, unacknowledged): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE NOT acknowledged)
            FROM alerts
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let mut stats = AlertStats {
            total: total as u64,
            unacknowledged: unacknowledged as u64,
            ..AlertStats::default()
        };

        for (column, target) in [
            ("severity", &mut stats.by_severity),
            ("sensor_type", &mut stats.by_sensor_type),
            ("status", &mut stats.by_status),
        ] {
            let sql = format!(
                "SELECT {column}::text, COUNT(*) FROM alerts \
                 WHERE created_at >= $1 GROUP BY {column}"
            );
            let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
                .bind(since)
                .fetch_all(&self.pool)
                .await?;
            target.extend(rows.into_iter().map(|(k, n)| (k, n as u64)));
        }

        Ok(stats)
    }

    async fn purge_alerts(
        &self,
        resolved_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM alerts
            WHERE severity <> 'critical'
              AND ((resolved AND resolved_at < $1)
                   OR (expires_at IS NOT NULL AND expires_at < $2))
            "#,
        )
        .bind(resolved_before)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CommandStore for PgStore {
    async fn insert_command(&self, c: &DeviceCommand) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_commands (
                id, device_id, device_type, location, command, command_value,
                display_text, duration_ms, frequency, repeat_count, priority, status,
                sent_at, acknowledged_at, completed_at, device_response, error_code,
                error_message, source, requested_by, is_urgent, expires_at, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            "#,
        )
        .bind(c.id)
        .bind(&c.device_id)
        .bind(c.device_type)
        .bind(&c.location)
        .bind(c.command)
        .bind(c.command_value)
        .bind(&c.display_text)
        .bind(c.parameters.duration_ms)
        .bind(c.parameters.frequency)
        .bind(c.parameters.repeat_count)
        .bind(c.parameters.priority)
        .bind(c.status)
        .bind(c.sent_at)
        .bind(c.acknowledged_at)
        .bind(c.completed_at)
        .bind(&c.device_response)
        .bind(&c.error_code)
        .bind(&c.error_message)
        .bind(c.source)
        .bind(&c.requested_by)
        .bind(c.is_urgent)
        .bind(c.expires_at)
        .bind(&c.metadata)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_command(&self, id: Uuid) -> StoreResult<Option<DeviceCommand>> {
        let sql = format!("SELECT {COMMAND_COLUMNS} FROM device_commands WHERE id = $1");
        let row = sqlx::query_as::<_, DeviceCommand>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn latest_command(&self, device_id: &str) -> StoreResult<Option<DeviceCommand>> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM device_commands \
             WHERE device_id = $1 \
             ORDER BY created_at DESC \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, DeviceCommand>(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn pending_commands(
        &self,
        device_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM device_commands \
             WHERE device_id = $1 AND status = 'pending' \
             ORDER BY priority DESC, created_at ASC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, DeviceCommand>(&sql)
            .bind(device_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn active_commands(
        &self,
        filter: &ActiveCommandFilter,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM device_commands \
             WHERE status IN ('pending', 'sent', 'executing') \
               AND ($1::device_type IS NULL OR device_type = $1) \
               AND ($2::text IS NULL OR location = $2) \
             ORDER BY is_urgent DESC, priority DESC, created_at ASC \
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, DeviceCommand>(&sql)
            .bind(filter.device_type)
            .bind(filter.location.as_deref())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn command_history(
        &self,
        device_id: &str,
        status: Option<CommandStatus>,
        limit: u32,
    ) -> StoreResult<Vec<DeviceCommand>> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM device_commands \
             WHERE device_id = $1 \
               AND ($2::command_status IS NULL OR status = $2) \
             ORDER BY created_at DESC \
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, DeviceCommand>(&sql)
            .bind(device_id)
            .bind(status)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn command_counts(&self, device_id: &str) -> StoreResult<CommandCounts> {
        let (total, completed, pending, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'completed'),
                   COUNT(*) FILTER (WHERE status = 'pending'),
                   COUNT(*) FILTER (WHERE status = 'failed')
            FROM device_commands
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CommandCounts {
            total: total as u64,
            completed: completed as u64,
            pending: pending as u64,
            failed: failed as u64,
        })
    }

    async fn count_commands(&self, status: Option<CommandStatus>) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM device_commands \
             WHERE ($1::command_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn transition_command(
        &self,
        id: Uuid,
        expected: CommandStatus,
        t: &CommandTransition,
    ) -> StoreResult<Option<DeviceCommand>> {
        let sql = format!(
            "UPDATE device_commands SET \
                 status          = $3, \
                 updated_at      = $4, \
                 sent_at         = CASE WHEN $3 = 'sent'::command_status      THEN $4 ELSE sent_at END, \
                 acknowledged_at = CASE WHEN $3 = 'executing'::command_status THEN $4 ELSE acknowledged_at END, \
                 completed_at    = CASE WHEN $3 = 'completed'::command_status THEN $4 ELSE completed_at END, \
                 device_response = COALESCE($5, device_response), \
                 error_code      = COALESCE($6, error_code), \
                 error_message   = COALESCE($7, error_message) \
             WHERE id = $1 AND status = $2 \
             RETURNING {COMMAND_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DeviceCommand>(&sql)
            .bind(id)
            .bind(expected)
            .bind(t.to)
            .bind(t.at)
            .bind(t.device_response.as_deref())
            .bind(t.error_code.as_deref())
            .bind(t.error_message.as_deref())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn expire_pending(
        &self,
        now: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE device_commands
            SET status        = 'cancelled',
                error_message = $2,
                updated_at    = $1
            WHERE status = 'pending'
              AND expires_at IS NOT NULL
              AND expires_at < $1
              AND ($3::text IS NULL OR device_id = $3)
            "#,
        )
        .bind(now)
        .bind(EXPIRED_MESSAGE)
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn command_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<CommandStatRow>> {
        let rows = sqlx::query_as::<_, CommandStatRecord>(
            r#"
            SELECT device_type,
                   command,
                   status,
                   COUNT(*) AS count,
                   (AVG(EXTRACT(EPOCH FROM (completed_at - sent_at))) * 1000)::float8
                       AS avg_response_ms
            FROM device_commands
            WHERE created_at >= $1
            GROUP BY device_type, command, status
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| CommandStatRow {
                device_type: r.device_type,
                command: r.command,
                status: r.status,
                count: r.count as u64,
                avg_response_ms: r.avg_response_ms,
            })
            .collect())
    }

    async fn purge_commands(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM device_commands
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND created_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn is_available(&self) -> bool {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Store probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Store probe timed out");
                false
            }
        }
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

// ---------------------------------------------------------------------------
// Tests (need a live database: DATABASE_URL=postgres://… cargo test -- --ignored)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use sqlx::PgPool;

    use super::*;
    use crate::db::models::{
        AlertSeverity, AlertStatus, CommandParameters, CommandSource, ReadingStatus,
    };

    fn store(pool: PgPool) -> PgStore {
        PgStore::new(pool, Duration::from_secs(2))
    }

    fn reading(sensor_type: SensorType, value: f64, status: ReadingStatus) -> SensorReading {
        let now = Utc::now();
        SensorReading {
            id: Uuid::new_v4(),
            device_id: "dev1".into(),
            sensor_type,
            value: Some(value),
            status,
            recorded_at: now,
            created_at: now,
        }
    }

    fn alert() -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            sensor_type: SensorType::Gas,
            sensor_value: Some(350.0),
            device_id: "dev1".into(),
            location: "unknown".into(),
            message: "GAS Sensor detected DANGEROUS level (350)".into(),
            severity: AlertSeverity::High,
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
        }
    }

    fn command(priority: i32) -> DeviceCommand {
        let now = Utc::now();
        DeviceCommand {
            id: Uuid::new_v4(),
            device_id: "dev1".into(),
            device_type: DeviceType::Buzzer,
            location: "lab".into(),
            command: CommandAction::On,
            command_value: Some(1500),
            display_text: None,
            parameters: CommandParameters {
                priority,
                ..CommandParameters::default()
            },
            status: CommandStatus::Pending,
            sent_at: None,
            acknowledged_at: None,
            completed_at: None,
            device_response: None,
            error_code: None,
            error_message: None,
            source: CommandSource::Api,
            requested_by: "system".into(),
            is_urgent: false,
            expires_at: None,
            metadata: serde_json::json!({ "origin": "test" }),
            created_at: now,
            updated_at: now,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn reading_roundtrip_and_filters(pool: PgPool) {
        let store = store(pool);
        store
            .insert_reading(&reading(SensorType::Gas, 100.0, ReadingStatus::Normal))
            .await
            .unwrap();
        store
            .insert_reading(&reading(SensorType::Gas, 350.0, ReadingStatus::Danger))
            .await
            .unwrap();

        let latest = store.latest_reading(SensorType::Gas).await.unwrap().unwrap();
        assert_eq!(latest.value, Some(350.0));

        let filter = ReadingFilter {
            status: Some(ReadingStatus::Danger),
            ..ReadingFilter::default()
        };
        let page = store
            .query_readings(&filter, SortOrder::NewestFirst, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].status, ReadingStatus::Danger);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn reading_and_alert_commit_together(pool: PgPool) {
        let store = store(pool);
        let existing = alert();
        store.insert_alert(&existing).await.unwrap();

        // reusing an alert id violates the primary key and rolls the reading back
        let orphan = reading(SensorType::Gas, 350.0, ReadingStatus::Danger);
        assert!(store
            .insert_reading_with_alert(&orphan, Some(&existing))
            .await
            .is_err());
        assert!(store.latest_reading(SensorType::Gas).await.unwrap().is_none());

        let kept = reading(SensorType::Gas, 350.0, ReadingStatus::Danger);
        let raised = alert();
        store
            .insert_reading_with_alert(&kept, Some(&raised))
            .await
            .unwrap();
        assert_eq!(
            store.latest_reading(SensorType::Gas).await.unwrap().unwrap().id,
            kept.id
        );
        assert!(store.get_alert(raised.id).await.unwrap().is_some());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn alert_transitions_and_bulk_acknowledge(pool: PgPool) {
        let store = store(pool);
        let a = alert();
        let b = alert();
        store.insert_alert(&a).await.unwrap();
        store.insert_alert(&b).await.unwrap();

        let n = store
            .acknowledge_alerts(&[a.id, b.id, Uuid::new_v4()], "ops", Utc::now())
            .await
            .unwrap();
        assert_eq!(n, 2);

        let resolved = store
            .transition_alert(
                a.id,
                &AlertTransition::Resolve { notes: Some("vented".into()), at: Utc::now() },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.acknowledged && resolved.resolved);

        let reactivated = store
            .transition_alert(a.id, &AlertTransition::Reactivate { at: Utc::now() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reactivated.status, AlertStatus::Active);
        assert!(!reactivated.acknowledged);

        let stats = store
            .alert_stats(Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_severity["high"], 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn command_compare_and_set(pool: PgPool) {
        let store = store(pool);
        let c = command(7);
        store.insert_command(&c).await.unwrap();

        let sent = CommandTransition::to(CommandStatus::Sent, Utc::now());
        assert!(store
            .transition_command(c.id, CommandStatus::Executing, &sent)
            .await
            .unwrap()
            .is_none());

        let updated = store
            .transition_command(c.id, CommandStatus::Pending, &sent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, CommandStatus::Sent);
        assert!(updated.sent_at.is_some());
        assert_eq!(updated.metadata["origin"], "test");
        assert_eq!(updated.parameters.priority, 7);
    }
}

//! SQLite alert store
//!
//! - **WAL mode** so dashboards can read while a scan writes
//! - **Migrations** run on open (`migrations/`)
//! - **One active alert per key** is enforced twice: by a partial unique
//!   index on `(device_id, component_type, component_name) WHERE active`, and
//!   by serializing upserts through a process-wide write lock inside a
//!   transaction

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::backend::{AlertStore, StoreHealth, watermark_of};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertKey, AlertRow, AlertUpsert, LogWatermark, UpsertOutcome, UrgencyRule, parse_alert_status,
};
use crate::redfish::{LogEntry, LogSource};
use crate::{AlertStatus, ComponentType, HealthStatus, UrgencyLevel};

const ALERT_COLUMNS: &str = "id, device_id, component_type, component_name, health_status, \
     urgency_level, alert_status, message, first_occurrence, last_occurrence, resolved_time, \
     occurrence_count";

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    write_lock: Mutex<()>,
}

impl SqliteBackend {
    /// Opens (or creates) the database file and runs migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            write_lock: Mutex::new(()),
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertRow> {
        let text = |column: &str| -> StorageResult<String> { Ok(row.try_get(column)?) };

        let component_type = ComponentType::from_str(&text("component_type")?)
            .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let urgency_raw = text("urgency_level")?;
        let urgency_level = UrgencyLevel::parse(&urgency_raw)
            .ok_or_else(|| StorageError::CorruptRow(format!("urgency '{urgency_raw}'")))?;
        let status_raw = text("alert_status")?;
        let alert_status = parse_alert_status(&status_raw)
            .ok_or_else(|| StorageError::CorruptRow(format!("alert status '{status_raw}'")))?;

        Ok(AlertRow {
            id: row.try_get("id")?,
            device_id: text("device_id")?,
            component_type,
            component_name: text("component_name")?,
            health_status: HealthStatus::parse(&text("health_status")?),
            urgency_level,
            alert_status,
            message: text("message")?,
            first_occurrence: Self::millis_to_timestamp(row.try_get("first_occurrence")?),
            last_occurrence: Self::millis_to_timestamp(row.try_get("last_occurrence")?),
            resolved_time: row
                .try_get::<Option<i64>, _>("resolved_time")?
                .map(Self::millis_to_timestamp),
            occurrence_count: row.try_get("occurrence_count")?,
        })
    }
}

#[async_trait]
impl AlertStore for SqliteBackend {
    #[instrument(skip(self, alert), fields(key = %alert.key))]
    async fn upsert_alert(&self, alert: AlertUpsert) -> StorageResult<UpsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query(
            r#"
            SELECT health_status, urgency_level FROM alerts
            WHERE device_id = ? AND component_type = ? AND component_name = ?
              AND alert_status = 'active'
            "#,
        )
        .bind(&alert.key.device_id)
        .bind(alert.key.component_type.as_str())
        .bind(&alert.key.component_name)
        .fetch_optional(&mut *tx)
        .await?;

        let (previous_health, previous_urgency) = match &previous {
            Some(row) => {
                let health: String = row.try_get("health_status")?;
                let urgency: String = row.try_get("urgency_level")?;
                (Some(HealthStatus::parse(&health)), UrgencyLevel::parse(&urgency))
            }
            None => (None, None),
        };

        let at = Self::timestamp_to_millis(&alert.at);
        let sql = format!(
            r#"
            INSERT INTO alerts (
                device_id, component_type, component_name, health_status, urgency_level,
                alert_status, message, first_occurrence, last_occurrence, occurrence_count
            )
            VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?, 1)
            ON CONFLICT (device_id, component_type, component_name) WHERE alert_status = 'active'
            DO UPDATE SET
                health_status = excluded.health_status,
                urgency_level = excluded.urgency_level,
                message = excluded.message,
                last_occurrence = excluded.last_occurrence,
                occurrence_count = alerts.occurrence_count + 1
            RETURNING {ALERT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(&alert.key.device_id)
            .bind(alert.key.component_type.as_str())
            .bind(&alert.key.component_name)
            .bind(alert.health_status.as_str())
            .bind(alert.urgency_level.as_str())
            .bind(&alert.message)
            .bind(at)
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;
        let stored = Self::alert_from_row(&row)?;

        tx.commit().await?;

        Ok(UpsertOutcome {
            created: previous.is_none(),
            alert: stored,
            previous_health,
            previous_urgency,
        })
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn resolve_alert(
        &self,
        key: &AlertKey,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<AlertRow>> {
        let _guard = self.write_lock.lock().await;

        let sql = format!(
            r#"
            UPDATE alerts SET alert_status = 'resolved', resolved_time = ?
            WHERE device_id = ? AND component_type = ? AND component_name = ?
              AND alert_status = 'active'
            RETURNING {ALERT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&at))
            .bind(&key.device_id)
            .bind(key.component_type.as_str())
            .bind(&key.component_name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn active_alerts(&self, device_id: Option<&str>) -> StorageResult<Vec<AlertRow>> {
        let sql = format!(
            r#"
            SELECT {ALERT_COLUMNS} FROM alerts
            WHERE alert_status = 'active' AND (? IS NULL OR device_id = ?)
            ORDER BY last_occurrence DESC, id DESC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(device_id)
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn urgency_rule(
        &self,
        business_type: &str,
        hardware_type: &str,
    ) -> StorageResult<Option<UrgencyLevel>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT urgency_level FROM urgency_rules WHERE business_type = ? AND hardware_type = ?",
        )
        .bind(business_type)
        .bind(hardware_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(level,)| UrgencyLevel::parse(&level)))
    }

    async fn put_urgency_rule(&self, rule: UrgencyRule) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO urgency_rules (business_type, hardware_type, urgency_level)
            VALUES (?, ?, ?)
            ON CONFLICT (business_type, hardware_type) DO UPDATE SET
                urgency_level = excluded.urgency_level
            "#,
        )
        .bind(&rule.business_type)
        .bind(&rule.hardware_type)
        .bind(rule.urgency_level.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_watermark(
        &self,
        device_id: &str,
        source: LogSource,
    ) -> StorageResult<Option<LogWatermark>> {
        let row: Option<(Option<String>, Option<i64>)> = sqlx::query_as(
            "SELECT last_entry_id, last_timestamp FROM log_watermarks WHERE device_id = ? AND source = ?",
        )
        .bind(device_id)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(last_entry_id, last_timestamp)| LogWatermark {
            last_entry_id,
            last_timestamp: last_timestamp.map(Self::millis_to_timestamp),
        }))
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn record_log_entries(
        &self,
        device_id: &str,
        source: LogSource,
        entries: &[LogEntry],
    ) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = Self::timestamp_to_millis(&Utc::now());
        let mut inserted = 0;

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO log_entries (
                    device_id, source, entry_id, severity, created, message, sensor_type, collected_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (device_id, source, entry_id) DO NOTHING
                "#,
            )
            .bind(device_id)
            .bind(source.as_str())
            .bind(&entry.entry_id)
            .bind(entry.severity.as_str())
            .bind(entry.created.as_ref().map(Self::timestamp_to_millis))
            .bind(&entry.message)
            .bind(&entry.sensor_type)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        if let Some(watermark) = watermark_of(entries) {
            sqlx::query(
                r#"
                INSERT INTO log_watermarks (device_id, source, last_entry_id, last_timestamp, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (device_id, source) DO UPDATE SET
                    last_entry_id = excluded.last_entry_id,
                    last_timestamp = excluded.last_timestamp,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(device_id)
            .bind(source.as_str())
            .bind(&watermark.last_entry_id)
            .bind(watermark.last_timestamp.as_ref().map(Self::timestamp_to_millis))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn cleanup_resolved_alerts(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().await;
        let cutoff = Self::timestamp_to_millis(&before);
        let result = sqlx::query(
            "DELETE FROM alerts WHERE alert_status = ? AND resolved_time < ?",
        )
        .bind(AlertStatus::Resolved.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() as usize;
        if deleted > 0 {
            info!("deleted {deleted} resolved alerts");
        }

        let pruned = sqlx::query("DELETE FROM log_entries WHERE created IS NOT NULL AND created < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if pruned > 0 {
            info!("pruned {pruned} log entries");
        }

        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<StoreHealth> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(StoreHealth {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(StoreHealth {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

//! Alert store trait definition

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AlertKey, AlertRow, AlertUpsert, LogWatermark, UpsertOutcome, UrgencyRule};
use crate::UrgencyLevel;
use crate::redfish::{LogEntry, LogSource};

/// Health of the storage backend
#[derive(Debug, Clone)]
pub struct StoreHealth {
    pub healthy: bool,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

/// Persistence boundary of the monitoring pipeline.
///
/// Implementations must be safe under concurrent writers for the same alert
/// key: two overlapping upserts for one key still leave exactly one active row.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Updates the active alert for `alert.key` in place, or inserts one with
    /// `first_occurrence = last_occurrence = alert.at`.
    async fn upsert_alert(&self, alert: AlertUpsert) -> StorageResult<UpsertOutcome>;

    /// Marks the active alert for `key` resolved. Returns it, if there was one.
    async fn resolve_alert(&self, key: &AlertKey, at: DateTime<Utc>)
    -> StorageResult<Option<AlertRow>>;

    /// Active alerts, optionally for one device, newest first.
    async fn active_alerts(&self, device_id: Option<&str>) -> StorageResult<Vec<AlertRow>>;

    async fn urgency_rule(
        &self,
        business_type: &str,
        hardware_type: &str,
    ) -> StorageResult<Option<UrgencyLevel>>;

    async fn put_urgency_rule(&self, rule: UrgencyRule) -> StorageResult<()>;

    async fn log_watermark(
        &self,
        device_id: &str,
        source: LogSource,
    ) -> StorageResult<Option<LogWatermark>>;

    /// Stores entries not seen before and moves the watermark to the newest
    /// one. Entries are expected newest first. Returns how many were new.
    async fn record_log_entries(
        &self,
        device_id: &str,
        source: LogSource,
        entries: &[LogEntry],
    ) -> StorageResult<usize>;

    /// Deletes resolved alerts resolved before `before`, along with stored
    /// log entries created before it. Watermarks are kept, so incremental
    /// collection does not read pruned entries again.
    ///
    /// Returns the number of alerts deleted.
    async fn cleanup_resolved_alerts(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<StoreHealth>;

    async fn close(&self) -> StorageResult<()>;
}

/// Newest entry of a newest-first batch, as a watermark.
pub(crate) fn watermark_of(entries: &[LogEntry]) -> Option<LogWatermark> {
    entries.first().map(|newest| LogWatermark {
        last_entry_id: Some(newest.entry_id.clone()),
        last_timestamp: newest.created,
    })
}

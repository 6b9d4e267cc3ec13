//! In-memory alert store (no persistence)
//!
//! Used by tests and by deployments configured with `"backend": "none"`.
//! All state lives behind one mutex, which also makes every upsert atomic.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{AlertStore, StoreHealth, watermark_of};
use super::error::StorageResult;
use super::schema::{AlertKey, AlertRow, AlertUpsert, LogWatermark, UpsertOutcome, UrgencyRule};
use crate::redfish::{LogEntry, LogSource};
use crate::{AlertStatus, UrgencyLevel};

#[derive(Debug, Default)]
struct State {
    alerts: Vec<AlertRow>,
    next_id: i64,
    rules: HashMap<(String, String), UrgencyLevel>,
    log_entries: HashMap<(String, LogSource), Vec<LogEntry>>,
    seen_entries: HashSet<(String, LogSource, String)>,
    watermarks: HashMap<(String, LogSource), LogWatermark>,
}

impl State {
    fn active_mut(&mut self, key: &AlertKey) -> Option<&mut AlertRow> {
        self.alerts
            .iter_mut()
            .find(|a| a.alert_status == AlertStatus::Active && a.key() == *key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert ever stored, resolved ones included.
    pub async fn all_alerts(&self) -> Vec<AlertRow> {
        self.state.lock().await.alerts.clone()
    }

    pub async fn stored_log_entries(&self, device_id: &str, source: LogSource) -> Vec<LogEntry> {
        self.state
            .lock()
            .await
            .log_entries
            .get(&(device_id.to_string(), source))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AlertStore for MemoryBackend {
    async fn upsert_alert(&self, alert: AlertUpsert) -> StorageResult<UpsertOutcome> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.active_mut(&alert.key) {
            let previous_health = Some(existing.health_status);
            let previous_urgency = Some(existing.urgency_level);

            existing.health_status = alert.health_status;
            existing.urgency_level = alert.urgency_level;
            existing.message = alert.message;
            existing.last_occurrence = alert.at;
            existing.occurrence_count += 1;

            return Ok(UpsertOutcome {
                alert: existing.clone(),
                created: false,
                previous_health,
                previous_urgency,
            });
        }

        state.next_id += 1;
        let row = AlertRow {
            id: state.next_id,
            device_id: alert.key.device_id,
            component_type: alert.key.component_type,
            component_name: alert.key.component_name,
            health_status: alert.health_status,
            urgency_level: alert.urgency_level,
            alert_status: AlertStatus::Active,
            message: alert.message,
            first_occurrence: alert.at,
            last_occurrence: alert.at,
            resolved_time: None,
            occurrence_count: 1,
        };
        debug!("in-memory store: new alert {} for {}", row.id, row.key());
        state.alerts.push(row.clone());

        Ok(UpsertOutcome {
            alert: row,
            created: true,
            previous_health: None,
            previous_urgency: None,
        })
    }

    async fn resolve_alert(
        &self,
        key: &AlertKey,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<AlertRow>> {
        let mut state = self.state.lock().await;
        Ok(state.active_mut(key).map(|alert| {
            alert.alert_status = AlertStatus::Resolved;
            alert.resolved_time = Some(at);
            alert.clone()
        }))
    }

    async fn active_alerts(&self, device_id: Option<&str>) -> StorageResult<Vec<AlertRow>> {
        let state = self.state.lock().await;
        let mut alerts = state
            .alerts
            .iter()
            .filter(|a| a.alert_status == AlertStatus::Active)
            .filter(|a| device_id.is_none_or(|id| a.device_id == id))
            .cloned()
            .collect::<Vec<_>>();
        alerts.sort_by(|a, b| b.last_occurrence.cmp(&a.last_occurrence));
        Ok(alerts)
    }

    async fn urgency_rule(
        &self,
        business_type: &str,
        hardware_type: &str,
    ) -> StorageResult<Option<UrgencyLevel>> {
        let state = self.state.lock().await;
        Ok(state
            .rules
            .get(&(business_type.to_string(), hardware_type.to_string()))
            .copied())
    }

    async fn put_urgency_rule(&self, rule: UrgencyRule) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state
            .rules
            .insert((rule.business_type, rule.hardware_type), rule.urgency_level);
        Ok(())
    }

    async fn log_watermark(
        &self,
        device_id: &str,
        source: LogSource,
    ) -> StorageResult<Option<LogWatermark>> {
        let state = self.state.lock().await;
        Ok(state
            .watermarks
            .get(&(device_id.to_string(), source))
            .cloned())
    }

    async fn record_log_entries(
        &self,
        device_id: &str,
        source: LogSource,
        entries: &[LogEntry],
    ) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;

        for entry in entries {
            let identity = (device_id.to_string(), source, entry.entry_id.clone());
            if state.seen_entries.insert(identity) {
                state
                    .log_entries
                    .entry((device_id.to_string(), source))
                    .or_default()
                    .push(entry.clone());
                inserted += 1;
            }
        }

        if let Some(watermark) = watermark_of(entries) {
            state.watermarks.insert((device_id.to_string(), source), watermark);
        }

        Ok(inserted)
    }

    async fn cleanup_resolved_alerts(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        let count_before = state.alerts.len();
        state.alerts.retain(|a| {
            a.alert_status == AlertStatus::Active || a.resolved_time.is_none_or(|t| t >= before)
        });
        let deleted = count_before - state.alerts.len();

        let state = &mut *state;
        let mut pruned = 0;
        for ((device_id, source), entries) in state.log_entries.iter_mut() {
            entries.retain(|entry| {
                let keep = entry.created.is_none_or(|t| t >= before);
                if !keep {
                    state
                        .seen_entries
                        .remove(&(device_id.clone(), *source, entry.entry_id.clone()));
                    pruned += 1;
                }
                keep
            });
        }
        state.log_entries.retain(|_, entries| !entries.is_empty());
        if pruned > 0 {
            debug!("pruned {pruned} log entries created before {before}");
        }

        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<StoreHealth> {
        let state = self.state.lock().await;
        Ok(StoreHealth {
            healthy: true,
            message: format!("in-memory backend holding {} alerts", state.alerts.len()),
            metadata: HashMap::from([("backend".to_string(), "memory".to_string())]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

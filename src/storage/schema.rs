//! Rows persisted by the alert store

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AlertDraft, AlertStatus, ComponentType, HealthStatus, UrgencyLevel};

/// Identity of an alert. At most one active alert exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertKey {
    pub device_id: String,
    pub component_type: ComponentType,
    pub component_name: String,
}

impl AlertKey {
    pub fn new(
        device_id: impl Into<String>,
        component_type: ComponentType,
        component_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            component_type,
            component_name: component_name.into(),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.device_id, self.component_type, self.component_name
        )
    }
}

/// Write request for one degraded component.
#[derive(Debug, Clone)]
pub struct AlertUpsert {
    pub key: AlertKey,
    pub health_status: HealthStatus,
    pub urgency_level: UrgencyLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AlertUpsert {
    pub fn from_draft(draft: &AlertDraft, urgency_level: UrgencyLevel, at: DateTime<Utc>) -> Self {
        Self {
            key: AlertKey::new(&draft.device_id, draft.component_type, &draft.component_name),
            health_status: draft.health_status,
            urgency_level,
            message: draft.message.clone(),
            at,
        }
    }
}

/// A stored alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRow {
    pub id: i64,
    pub device_id: String,
    pub component_type: ComponentType,
    pub component_name: String,
    pub health_status: HealthStatus,
    pub urgency_level: UrgencyLevel,
    pub alert_status: AlertStatus,
    pub message: String,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub resolved_time: Option<DateTime<Utc>>,
    pub occurrence_count: i64,
}

impl AlertRow {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(&self.device_id, self.component_type, &self.component_name)
    }
}

/// What an upsert did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub alert: AlertRow,
    pub created: bool,
    pub previous_health: Option<HealthStatus>,
    pub previous_urgency: Option<UrgencyLevel>,
}

impl UpsertOutcome {
    /// Created, or health/urgency changed in place.
    pub fn is_visible_change(&self) -> bool {
        self.created
            || self.previous_health != Some(self.alert.health_status)
            || self.previous_urgency != Some(self.alert.urgency_level)
    }
}

/// Business type × hardware type override of the provisional urgency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgencyRule {
    pub business_type: String,
    pub hardware_type: String,
    pub urgency_level: UrgencyLevel,
}

/// Last log entry seen per device and log source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogWatermark {
    pub last_entry_id: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

pub(crate) fn parse_alert_status(raw: &str) -> Option<AlertStatus> {
    match raw {
        "active" => Some(AlertStatus::Active),
        "resolved" => Some(AlertStatus::Resolved),
        _ => None,
    }
}

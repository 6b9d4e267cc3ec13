//! Events pushed to realtime subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertChange, AlertDelta};
use crate::devices::{DeviceStatus, ScanState};
use crate::{ComponentType, HealthStatus, UrgencyLevel};

pub const ROOM_DASHBOARD: &str = "dashboard";
pub const ROOM_ALERTS: &str = "alerts";
pub const ROOM_URGENT_ALERTS: &str = "urgent_alerts";
pub const ROOM_DEVICE_MONITORING: &str = "device_monitoring";

/// Room carrying everything about one device.
pub fn device_room(device_id: &str) -> String {
    format!("device_{device_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    AlertUpdate {
        alert_id: i64,
        device_id: String,
        component_type: ComponentType,
        component_name: String,
        health_status: HealthStatus,
        urgency_level: UrgencyLevel,
        change: AlertChange,
        message: String,
        timestamp: DateTime<Utc>,
    },
    DeviceStatusUpdate {
        device_id: String,
        health_status: HealthStatus,
        scan_state: ScanState,
        last_successful_check: Option<DateTime<Utc>>,
        last_error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ScanStarted {
        device_count: usize,
        forced: bool,
        timestamp: DateTime<Utc>,
    },
    ScanCompleted {
        device_count: usize,
        succeeded: usize,
        failed: usize,
        alert_changes: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    SystemNotification {
        level: NotificationLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl RealtimeEvent {
    pub fn alert_update(delta: &AlertDelta) -> Self {
        let alert = &delta.alert;
        RealtimeEvent::AlertUpdate {
            alert_id: alert.id,
            device_id: alert.device_id.clone(),
            component_type: alert.component_type,
            component_name: alert.component_name.clone(),
            health_status: alert.health_status,
            urgency_level: alert.urgency_level,
            change: delta.change,
            message: alert.message.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn device_status_update(device_id: &str, status: &DeviceStatus) -> Self {
        RealtimeEvent::DeviceStatusUpdate {
            device_id: device_id.to_string(),
            health_status: status.overall_health,
            scan_state: status.scan_state,
            last_successful_check: status.last_successful_check,
            last_error: status.last_error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(level: NotificationLevel, message: impl Into<String>) -> Self {
        RealtimeEvent::SystemNotification {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::AlertUpdate { .. } => "alert_update",
            RealtimeEvent::DeviceStatusUpdate { .. } => "device_status_update",
            RealtimeEvent::ScanStarted { .. } => "scan_started",
            RealtimeEvent::ScanCompleted { .. } => "scan_completed",
            RealtimeEvent::SystemNotification { .. } => "system_notification",
        }
    }

    /// Rooms this event is delivered to.
    ///
    /// Resolutions are not urgent even when the resolved alert was, so only
    /// raised or changed urgent alerts reach `urgent_alerts`.
    pub fn rooms(&self) -> Vec<String> {
        match self {
            RealtimeEvent::AlertUpdate {
                device_id,
                urgency_level,
                change,
                ..
            } => {
                let mut rooms = vec![ROOM_DASHBOARD.to_string(), ROOM_ALERTS.to_string()];
                if *urgency_level == UrgencyLevel::Urgent && *change != AlertChange::Resolved {
                    rooms.push(ROOM_URGENT_ALERTS.to_string());
                }
                rooms.push(device_room(device_id));
                rooms
            }
            RealtimeEvent::DeviceStatusUpdate { device_id, .. } => vec![
                ROOM_DASHBOARD.to_string(),
                ROOM_DEVICE_MONITORING.to_string(),
                device_room(device_id),
            ],
            RealtimeEvent::ScanStarted { .. } | RealtimeEvent::ScanCompleted { .. } => vec![
                ROOM_DASHBOARD.to_string(),
                ROOM_DEVICE_MONITORING.to_string(),
            ],
            RealtimeEvent::SystemNotification { .. } => Vec::new(),
        }
    }

    /// System notifications go to every subscriber rather than to rooms.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, RealtimeEvent::SystemNotification { .. })
    }
}

//! Message types for actor communication
//!
//! Commands travel to one actor over its mpsc channel. Queries carry a
//! oneshot `respond_to` sender for the reply.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::realtime::RealtimeEvent;

/// Commands accepted by the scan coordinator
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Operator-initiated fleet scan outside the regular schedule
    TriggerScan {
        /// Skip the minimum interval since the last completed scan
        force: bool,
        respond_to: oneshot::Sender<TriggerResponse>,
    },

    GetLastSummary {
        respond_to: oneshot::Sender<Option<FleetScanSummary>>,
    },

    /// Stop scheduling. A scan in flight is cancelled.
    Shutdown,
}

/// Answer to a manual trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl TriggerResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// What one fleet scan did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetScanSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub forced: bool,
    pub device_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Alerts raised, changed or resolved
    pub alert_changes: usize,
    /// Device ids whose scan failed
    pub failed_devices: Vec<String>,
}

/// Commands accepted by the notification worker
#[derive(Debug)]
pub enum NotifierCommand {
    Publish(RealtimeEvent),

    GetStats {
        respond_to: oneshot::Sender<NotificationStats>,
    },

    Shutdown,
}

/// Delivery counters of the notification worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    /// Events handled
    pub events: u64,
    /// Subscriber deliveries, summed over events
    pub delivered: u64,
    /// Events whose local fan-out failed
    pub failed: u64,
    /// Cross-process publishes that succeeded
    pub published: u64,
    /// Cross-process publishes that failed
    pub publish_failures: u64,
}

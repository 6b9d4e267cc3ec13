//! API request and response bodies

use serde::{Deserialize, Serialize};

use crate::actors::{FleetScanSummary, NotificationStats};
use crate::devices::{Device, DeviceStatus};
use crate::storage::AlertRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage: StorageHealth,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    pub healthy: bool,
    pub message: String,
}

/// A device as the dashboard lists it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub status: DeviceStatus,
    pub active_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceView>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertQuery {
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertRow>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusResponse {
    pub last_scan: Option<FleetScanSummary>,
    pub notifications: NotificationStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogRequest {
    #[serde(default)]
    pub force_refresh: bool,
}

//! Monitored devices and their per-device status board

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::DeviceConfig;
use crate::redfish::BmcEndpoint;
use crate::{HealthStatus, ScanResult};

/// Read-only snapshot of one server, taken at the start of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub hostname: String,
    pub business_ip: Option<IpAddr>,
    pub oob_ip: IpAddr,
    pub oob_port: u16,
    #[serde(skip)]
    pub credential_ref: String,
    pub business_type: Option<String>,
    pub monitor_enabled: bool,
}

impl Device {
    pub fn endpoint(&self) -> BmcEndpoint {
        BmcEndpoint::new(self.oob_ip.to_string(), self.oob_port)
    }
}

impl From<DeviceConfig> for Device {
    fn from(config: DeviceConfig) -> Self {
        Self {
            id: config.id,
            hostname: config.hostname,
            business_ip: config.business_ip,
            oob_ip: config.oob_ip,
            oob_port: config.oob_port,
            credential_ref: config.credential_ref,
            business_type: config.business_type,
            monitor_enabled: config.monitor_enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    /// Never scanned.
    #[default]
    Pending,
    Ok,
    Error,
}

/// What the dashboard shows for one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub overall_health: HealthStatus,
    pub scan_state: ScanState,
    pub last_successful_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    /// Applies one scan result. A failed scan keeps the last successful
    /// check time so the device stays visible with its history.
    fn apply(&mut self, result: &ScanResult) {
        if result.success {
            self.overall_health = result.overall_health;
            self.scan_state = ScanState::Ok;
            self.last_successful_check = Some(result.checked_at);
        } else {
            self.overall_health = HealthStatus::Unknown;
            self.scan_state = ScanState::Error;
        }

        match &result.error {
            Some(error) => {
                self.last_error = Some(error.clone());
                self.last_error_at = Some(result.checked_at);
            }
            None if result.success => {
                self.last_error = None;
                self.last_error_at = None;
            }
            None => {}
        }
    }

    /// Whether the change is worth a `device_status_update` event.
    pub fn differs_visibly(&self, other: &DeviceStatus) -> bool {
        self.overall_health != other.overall_health || self.scan_state != other.scan_state
    }
}

/// Where the core gets its devices from and reports their status back to.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn monitored_devices(&self) -> Vec<Device>;

    async fn device(&self, id: &str) -> Option<Device>;

    /// Records a scan outcome, returning the status before and after.
    async fn report_status(&self, result: &ScanResult) -> (DeviceStatus, DeviceStatus);

    async fn statuses(&self) -> Vec<(Device, DeviceStatus)>;
}

/// Device list from configuration with an in-process status board.
#[derive(Debug, Default)]
pub struct InMemoryDeviceRegistry {
    devices: Vec<Device>,
    statuses: Arc<RwLock<HashMap<String, DeviceStatus>>>,
}

impl InMemoryDeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            statuses: Arc::default(),
        }
    }

    pub fn from_config(devices: Vec<DeviceConfig>) -> Self {
        Self::new(devices.into_iter().map(Device::from).collect())
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn monitored_devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|device| device.monitor_enabled)
            .cloned()
            .collect()
    }

    async fn device(&self, id: &str) -> Option<Device> {
        self.devices.iter().find(|device| device.id == id).cloned()
    }

    async fn report_status(&self, result: &ScanResult) -> (DeviceStatus, DeviceStatus) {
        let mut statuses = self.statuses.write().await;
        let status = statuses.entry(result.device_id.clone()).or_default();

        let previous = status.clone();
        status.apply(result);
        (previous, status.clone())
    }

    async fn statuses(&self) -> Vec<(Device, DeviceStatus)> {
        let statuses = self.statuses.read().await;
        self.devices
            .iter()
            .map(|device| {
                let status = statuses.get(&device.id).cloned().unwrap_or_default();
                (device.clone(), status)
            })
            .collect()
    }
}

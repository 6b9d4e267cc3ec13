//! Per-device health analysis
//!
//! One scan walks a fixed sequence:
//!
//! 1. probe the business address (when configured) and the management address
//! 2. if the management address is down, stop with connectivity results only
//! 3. otherwise decrypt credentials, fetch the inventory and normalize it
//! 4. score components, synthesize the memory summary and draft alerts
//!
//! Nothing here returns an error to the caller. Every failure is folded into
//! the [`ScanResult`].

pub mod memory;
pub mod scoring;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

pub use scoring::{alert_message, draft_alerts, overall_health};

use crate::config::{AnalyzerConfig, ConnectivityConfig, RedfishConfig};
use crate::credentials::CredentialStore;
use crate::monitors::{ConnectivityProbe, connectivity::oob_ports};
use crate::redfish::{RedfishClient, SystemInfo};
use crate::vendors;
use crate::{ComponentType, Device, HardwareOutcome, ScanError, ScanResult, UnifiedComponent};

/// Anything able to produce a [`ScanResult`] for a device.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    async fn scan(&self, device: &Device) -> ScanResult;
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub business_ports: Vec<u16>,
    pub oob_ports: Vec<u16>,
    pub memory_rollup_excluded_vendors: Vec<String>,
    pub connection_test_timeout: Duration,
}

impl AnalyzerSettings {
    pub fn from_config(
        analyzer: &AnalyzerConfig,
        connectivity: &ConnectivityConfig,
        redfish: &RedfishConfig,
    ) -> Self {
        Self {
            business_ports: connectivity.business_ports.clone(),
            oob_ports: connectivity.oob_ports.clone(),
            memory_rollup_excluded_vendors: analyzer.memory_rollup_excluded_vendors.clone(),
            connection_test_timeout: Duration::from_secs(redfish.connection_test_timeout_secs),
        }
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self::from_config(
            &AnalyzerConfig::default(),
            &ConnectivityConfig::default(),
            &RedfishConfig::default(),
        )
    }
}

/// Result of a diagnostic connection test. Never touches alert state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub system_info: Option<SystemInfo>,
}

impl ConnectionTestResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            system_info: None,
        }
    }
}

pub struct HealthAnalyzer {
    probe: Arc<dyn ConnectivityProbe>,
    credentials: Arc<dyn CredentialStore>,
    client: RedfishClient,
    settings: AnalyzerSettings,
}

impl HealthAnalyzer {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        credentials: Arc<dyn CredentialStore>,
        client: RedfishClient,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            probe,
            credentials,
            client,
            settings,
        }
    }

    pub fn client(&self) -> &RedfishClient {
        &self.client
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Scans one device.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn scan_device(&self, device: &Device) -> ScanResult {
        let oob_ports = oob_ports(device.oob_port, &self.settings.oob_ports);

        let business_probe = async {
            match device.business_ip {
                Some(ip) => Some(self.probe.probe(ip, &self.settings.business_ports).await),
                None => None,
            }
        };
        let oob_probe = self.probe.probe(device.oob_ip, &oob_ports);
        let (business, oob) = tokio::join!(business_probe, oob_probe);

        // A device without a business address has no downtime component
        let mut components: Vec<UnifiedComponent> = business
            .iter()
            .map(|outcome| scoring::connectivity_component(ComponentType::Connectivity, outcome))
            .collect();
        components.push(scoring::connectivity_component(ComponentType::OobConnectivity, &oob));

        let hardware = if oob.online {
            match self.fetch_hardware(device).await {
                Ok((vendor, hardware_components, degraded)) => {
                    components.extend(hardware_components);
                    HardwareOutcome::Fetched { vendor, degraded }
                }
                Err(e) => {
                    warn!("hardware check failed: {e}");
                    HardwareOutcome::Failed(e)
                }
            }
        } else {
            debug!("management address offline, skipping hardware check");
            HardwareOutcome::Skipped
        };

        let alerts = draft_alerts(&device.id, &components);
        let result = ScanResult::completed(&device.id, components, alerts, hardware);

        info!(
            "scan finished: health {}, {} components, {} alerts",
            result.overall_health,
            result.components.len(),
            result.alerts.len()
        );
        result
    }

    async fn fetch_hardware(
        &self,
        device: &Device,
    ) -> Result<(&'static str, Vec<UnifiedComponent>, Vec<crate::Subsystem>), ScanError> {
        let credentials = self
            .credentials
            .decrypt(&device.credential_ref)
            .map_err(|e| ScanError::CredentialDecryptionFailed(e.to_string()))?;

        let raw = self
            .client
            .collect_inventory(&device.endpoint(), &credentials)
            .await?;

        let vendor = vendors::select(raw.manufacturer());
        debug!("normalizing with {} adaptor", vendor.name());

        let mut components = vendor.adaptor().normalize(&raw);
        if let Some(summary) = memory::summarize(
            &components,
            raw.system.as_ref(),
            vendor,
            &self.settings.memory_rollup_excluded_vendors,
        ) {
            components.push(summary);
        }

        Ok((vendor.name(), components, raw.degraded_subsystems()))
    }

    /// Logs in, reads the system summary and logs out again.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn test_connection(&self, device: &Device) -> ConnectionTestResult {
        let Ok(credentials) = self.credentials.decrypt(&device.credential_ref) else {
            return ConnectionTestResult::failure("password decryption failed");
        };

        let session = match self
            .client
            .connect(&device.endpoint(), &credentials, self.settings.connection_test_timeout)
            .await
        {
            Ok(session) => session,
            Err(e) => return ConnectionTestResult::failure(format!("connection failed: {e}")),
        };

        let info = session.system_info().await;
        session.close().await;

        match info {
            Ok(info) => ConnectionTestResult {
                success: true,
                message: "connection succeeded".to_string(),
                system_info: Some(info),
            },
            Err(e) => ConnectionTestResult::failure(format!("connected, but system info unavailable: {e}")),
        }
    }
}

#[async_trait]
impl DeviceScanner for HealthAnalyzer {
    async fn scan(&self, device: &Device) -> ScanResult {
        self.scan_device(device).await
    }
}

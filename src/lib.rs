pub mod actors;
pub mod alerts;
pub mod analyzer;
pub mod api;
pub mod config;
pub mod credentials;
pub mod devices;
pub mod error;
pub mod log_collector;
pub mod monitors;
pub mod realtime;
pub mod redfish;
pub mod storage;
pub mod util;
pub mod vendors;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use devices::Device;
pub use error::ScanError;

/// Normalized health of a single component or a whole device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "OK")]
    Ok,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Severity rank used for worst-of aggregation.
    pub fn score(self) -> u8 {
        match self {
            HealthStatus::Critical => 3,
            HealthStatus::Warning => 2,
            HealthStatus::Ok => 1,
            HealthStatus::Unknown => 0,
        }
    }

    /// Parses a vendor health string, mapping anything unrecognized to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ok" => HealthStatus::Ok,
            "warning" => HealthStatus::Warning,
            "critical" => HealthStatus::Critical,
            _ => HealthStatus::Unknown,
        }
    }

    pub fn is_degraded(self) -> bool {
        matches!(self, HealthStatus::Warning | HealthStatus::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Warning => "Warning",
            HealthStatus::Critical => "Critical",
            HealthStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HealthStatus::parse(s))
    }
}

/// Redfish `Status.State` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComponentState {
    Enabled,
    Disabled,
    Absent,
    StandbyOffline,
    StandbySpare,
    InTest,
    Starting,
    UnavailableOffline,
    Deferring,
    Quiesced,
    Updating,
    #[default]
    Unknown,
}

impl ComponentState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "enabled" => ComponentState::Enabled,
            "disabled" => ComponentState::Disabled,
            "absent" => ComponentState::Absent,
            "standbyoffline" => ComponentState::StandbyOffline,
            "standbyspare" => ComponentState::StandbySpare,
            "intest" => ComponentState::InTest,
            "starting" => ComponentState::Starting,
            "unavailableoffline" => ComponentState::UnavailableOffline,
            "deferring" => ComponentState::Deferring,
            "quiesced" => ComponentState::Quiesced,
            "updating" => ComponentState::Updating,
            _ => ComponentState::Unknown,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentType {
    System,
    Processor,
    Memory,
    Storage,
    Power,
    Temperature,
    Fan,
    Connectivity,
    OobConnectivity,
}

impl ComponentType {
    pub const ALL: [ComponentType; 9] = [
        ComponentType::System,
        ComponentType::Processor,
        ComponentType::Memory,
        ComponentType::Storage,
        ComponentType::Power,
        ComponentType::Temperature,
        ComponentType::Fan,
        ComponentType::Connectivity,
        ComponentType::OobConnectivity,
    ];

    /// Wire and storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::System => "system",
            ComponentType::Processor => "processor",
            ComponentType::Memory => "memory",
            ComponentType::Storage => "storage",
            ComponentType::Power => "power",
            ComponentType::Temperature => "temperature",
            ComponentType::Fan => "fan",
            ComponentType::Connectivity => "connectivity",
            ComponentType::OobConnectivity => "oobConnectivity",
        }
    }

    /// Hardware type code used by urgency rules.
    pub fn hardware_code(self) -> &'static str {
        match self {
            ComponentType::System => "system",
            ComponentType::Processor => "cpu",
            ComponentType::Memory => "memory",
            ComponentType::Storage => "storage",
            ComponentType::Power => "power",
            ComponentType::Temperature => "temperature",
            ComponentType::Fan => "fan",
            ComponentType::Connectivity => "downtime",
            ComponentType::OobConnectivity => "oob_connectivity",
        }
    }

    /// Human readable prefix for alert messages.
    pub fn label(self) -> &'static str {
        match self {
            ComponentType::System => "System",
            ComponentType::Processor => "Processor",
            ComponentType::Memory => "Memory",
            ComponentType::Storage => "Storage",
            ComponentType::Power => "Power supply",
            ComponentType::Temperature => "Temperature",
            ComponentType::Fan => "Fan",
            ComponentType::Connectivity => "Business network",
            ComponentType::OobConnectivity => "Out-of-band management",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown component type '{0}'")]
pub struct UnknownComponentType(pub String);

impl FromStr for ComponentType {
    type Err = UnknownComponentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownComponentType(s.to_string()))
    }
}

/// One hardware (or connectivity) component in the vendor-neutral model.
///
/// Recomputed on every scan and never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedComponent {
    pub component_type: ComponentType,
    pub component_name: String,
    pub health_status: HealthStatus,
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl UnifiedComponent {
    pub fn new(
        component_type: ComponentType,
        component_name: impl Into<String>,
        health_status: HealthStatus,
        state: ComponentState,
    ) -> Self {
        Self {
            component_type,
            component_name: component_name.into(),
            health_status,
            state,
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn is_present(&self) -> bool {
        self.state != ComponentState::Absent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Urgent,
    Scheduled,
}

impl UrgencyLevel {
    /// Provisional urgency derived from raw health alone.
    pub fn provisional(health: HealthStatus) -> Self {
        if health == HealthStatus::Critical {
            UrgencyLevel::Urgent
        } else {
            UrgencyLevel::Scheduled
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyLevel::Urgent => "urgent",
            UrgencyLevel::Scheduled => "scheduled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(UrgencyLevel::Urgent),
            "scheduled" => Some(UrgencyLevel::Scheduled),
            _ => None,
        }
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// Alert proposed by the analyzer for one degraded component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDraft {
    pub device_id: String,
    pub component_type: ComponentType,
    pub component_name: String,
    pub health_status: HealthStatus,
    pub urgency_level: UrgencyLevel,
    pub message: String,
}

/// Subsystems fetched concurrently from a management controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    System,
    Processors,
    Memory,
    Storage,
    Power,
    Thermal,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::System => "system",
            Subsystem::Processors => "processors",
            Subsystem::Memory => "memory",
            Subsystem::Storage => "storage",
            Subsystem::Power => "power",
            Subsystem::Thermal => "thermal",
        };
        f.write_str(name)
    }
}

/// What happened to the hardware half of a device scan.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareOutcome {
    /// Out-of-band controller unreachable, protocol client never called.
    Skipped,
    /// Inventory fetched. `degraded` lists subsystems that came back empty.
    Fetched {
        vendor: &'static str,
        degraded: Vec<Subsystem>,
    },
    Failed(ScanError),
}

/// Outcome of scanning one device, handed to reconciliation and notification.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub device_id: String,
    pub success: bool,
    pub overall_health: HealthStatus,
    pub components: Vec<UnifiedComponent>,
    pub alerts: Vec<AlertDraft>,
    pub error: Option<String>,
    pub hardware: HardwareOutcome,
    pub attempts: u32,
    pub checked_at: DateTime<Utc>,
}

impl ScanResult {
    /// Builds a result from the components and drafts a scan produced.
    pub fn completed(
        device_id: impl Into<String>,
        components: Vec<UnifiedComponent>,
        alerts: Vec<AlertDraft>,
        hardware: HardwareOutcome,
    ) -> Self {
        let (success, error) = match &hardware {
            HardwareOutcome::Failed(err) => (!err.fails_scan(), Some(err.to_string())),
            _ => (true, None),
        };

        Self {
            device_id: device_id.into(),
            success,
            overall_health: analyzer::overall_health(&components),
            components,
            alerts,
            error,
            hardware,
            attempts: 1,
            checked_at: Utc::now(),
        }
    }

    /// A scan that produced nothing usable (timeout, crashed task).
    pub fn failed(device_id: impl Into<String>, error: ScanError) -> Self {
        Self {
            device_id: device_id.into(),
            success: false,
            overall_health: HealthStatus::Unknown,
            components: Vec::new(),
            alerts: Vec::new(),
            error: Some(error.to_string()),
            hardware: HardwareOutcome::Failed(error),
            attempts: 1,
            checked_at: Utc::now(),
        }
    }

    /// Whether the scheduler should try this device again.
    pub fn is_retryable(&self) -> bool {
        matches!(&self.hardware, HardwareOutcome::Failed(err) if err.is_retryable())
    }

    pub fn hardware_fetched(&self) -> bool {
        matches!(self.hardware, HardwareOutcome::Fetched { .. })
    }
}

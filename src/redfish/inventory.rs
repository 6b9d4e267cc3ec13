//! Raw hardware inventory as returned by one controller

use serde::Serialize;
use serde_json::Value;

use super::error::RedfishError;
use super::json::{f64_at, str_at};
use crate::Subsystem;

/// A subsystem whose fetch failed and was degraded to an empty result.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedSubsystem {
    pub subsystem: Subsystem,
    pub error: RedfishError,
}

/// Vendor JSON for every subsystem of one server.
#[derive(Debug, Clone, Default)]
pub struct RawInventory {
    pub system: Option<Value>,
    pub processors: Vec<Value>,
    pub memory: Vec<Value>,
    pub storage: Vec<Value>,
    pub power: Vec<Value>,
    pub temperatures: Vec<Value>,
    pub fans: Vec<Value>,
    pub degraded: Vec<DegradedSubsystem>,
}

impl RawInventory {
    pub fn manufacturer(&self) -> &str {
        self.system
            .as_ref()
            .and_then(|system| str_at(system, "/Manufacturer"))
            .unwrap_or("")
    }

    pub fn is_degraded(&self, subsystem: Subsystem) -> bool {
        self.degraded.iter().any(|d| d.subsystem == subsystem)
    }

    pub fn degraded_subsystems(&self) -> Vec<Subsystem> {
        self.degraded.iter().map(|d| d.subsystem).collect()
    }

    pub(crate) fn degrade(&mut self, subsystem: Subsystem, error: RedfishError) {
        self.degraded.push(DegradedSubsystem { subsystem, error });
    }
}

/// Identity summary of a server, used by connection tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub host_name: Option<String>,
    pub power_state: Option<String>,
    pub bios_version: Option<String>,
    pub health: Option<String>,
    pub processor_count: Option<u64>,
    pub processor_model: Option<String>,
    pub total_memory_gib: Option<f64>,
}

impl SystemInfo {
    pub fn from_system(system: &Value) -> Self {
        let text = |pointer: &str| str_at(system, pointer).map(str::to_string);

        Self {
            manufacturer: text("/Manufacturer"),
            model: text("/Model"),
            serial_number: text("/SerialNumber"),
            host_name: text("/HostName"),
            power_state: text("/PowerState"),
            bios_version: text("/BiosVersion"),
            health: text("/Status/Health"),
            processor_count: system
                .pointer("/ProcessorSummary/Count")
                .and_then(Value::as_u64),
            processor_model: text("/ProcessorSummary/Model"),
            total_memory_gib: f64_at(system, "/MemorySummary/TotalSystemMemoryGiB"),
        }
    }
}

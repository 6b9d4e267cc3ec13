use serde_json::{Value, json};

use crate::redfish::json::str_at;
use crate::vendors::Vendor;
use crate::{ComponentState, ComponentType, HealthStatus, UnifiedComponent};

pub const MEMORY_SUMMARY_NAME: &str = "MemorySummary";

/// Synthesizes the `MemorySummary` component for a device.
///
/// With two or more degraded modules the summary is Critical once at least
/// half of them are bad, Warning otherwise. With no degraded module the
/// vendor's own roll-up decides, unless that vendor is excluded. This also
/// holds when no module could be read. Returns an OK summary when no rule
/// fires, and `None` when there is neither a module nor a usable roll-up.
pub fn summarize(
    memory: &[UnifiedComponent],
    system: Option<&Value>,
    vendor: Vendor,
    rollup_excluded: &[String],
) -> Option<UnifiedComponent> {
    let modules = memory
        .iter()
        .filter(|c| c.component_type == ComponentType::Memory && c.is_present())
        .collect::<Vec<_>>();
    let rollup = if vendor.is_listed(rollup_excluded) {
        None
    } else {
        system.and_then(rollup_health).filter(|h| *h != HealthStatus::Unknown)
    };

    if modules.is_empty() {
        return rollup.map(|health| match health {
            HealthStatus::Ok => summary(HealthStatus::Ok),
            degraded => summary(degraded).with_raw(json!({ "healthRollup": degraded.as_str() })),
        });
    }

    let total = modules.len();
    let bad = modules.iter().filter(|m| m.health_status.is_degraded()).count();

    if bad >= 2 {
        let health = if bad * 2 >= total {
            HealthStatus::Critical
        } else {
            HealthStatus::Warning
        };
        return Some(summary(health).with_raw(json!({
            "degradedModules": bad,
            "totalModules": total,
        })));
    }

    if bad == 0
        && let Some(rollup) = rollup
        && rollup.is_degraded()
    {
        return Some(summary(rollup).with_raw(json!({ "healthRollup": rollup.as_str() })));
    }

    Some(summary(HealthStatus::Ok))
}

fn summary(health: HealthStatus) -> UnifiedComponent {
    UnifiedComponent::new(
        ComponentType::Memory,
        MEMORY_SUMMARY_NAME,
        health,
        ComponentState::Enabled,
    )
}

fn rollup_health(system: &Value) -> Option<HealthStatus> {
    str_at(system, "/MemorySummary/Status/HealthRollup")
        .or_else(|| str_at(system, "/MemorySummary/Status/Health"))
        .map(HealthStatus::parse)
}

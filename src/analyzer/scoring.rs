use serde_json::Value;

use super::memory::MEMORY_SUMMARY_NAME;
use crate::monitors::ProbeOutcome;
use crate::{
    AlertDraft, ComponentState, ComponentType, HealthStatus, UnifiedComponent, UrgencyLevel,
};

pub const BUSINESS_LINK_NAME: &str = "downtime";
pub const OOB_LINK_NAME: &str = "oob";

/// Worst health over all present components, by [`HealthStatus::score`].
///
/// Unknown never outranks a known status. The result is Unknown only when
/// no present component reported OK, Warning or Critical.
pub fn overall_health(components: &[UnifiedComponent]) -> HealthStatus {
    components
        .iter()
        .filter(|c| c.is_present() && c.health_status != HealthStatus::Unknown)
        .map(|c| c.health_status)
        .max_by_key(|health| health.score())
        .unwrap_or(HealthStatus::Unknown)
}

/// Connectivity component for one probed address.
pub fn connectivity_component(kind: ComponentType, outcome: &ProbeOutcome) -> UnifiedComponent {
    let name = match kind {
        ComponentType::OobConnectivity => OOB_LINK_NAME,
        _ => BUSINESS_LINK_NAME,
    };

    let (health, state) = if outcome.online {
        (HealthStatus::Ok, ComponentState::Enabled)
    } else {
        (HealthStatus::Critical, ComponentState::UnavailableOffline)
    };
    UnifiedComponent::new(kind, name, health, state)
        .with_raw(serde_json::to_value(outcome).unwrap_or_default())
}

/// One draft per present Warning/Critical component.
pub fn draft_alerts(device_id: &str, components: &[UnifiedComponent]) -> Vec<AlertDraft> {
    components
        .iter()
        .filter(|c| c.is_present() && c.health_status.is_degraded())
        .map(|c| AlertDraft {
            device_id: device_id.to_string(),
            component_type: c.component_type,
            component_name: c.component_name.clone(),
            health_status: c.health_status,
            urgency_level: UrgencyLevel::provisional(c.health_status),
            message: alert_message(c),
        })
        .collect()
}

pub fn alert_message(component: &UnifiedComponent) -> String {
    let raw = &component.raw;
    let kind = component.component_type;

    match kind {
        ComponentType::Connectivity | ComponentType::OobConnectivity => {
            let detail = raw.get("detail").and_then(Value::as_str).unwrap_or("no response");
            format!("{} unreachable ({detail})", kind.label())
        }
        ComponentType::Memory if component.component_name == MEMORY_SUMMARY_NAME => {
            summary_message(component)
        }
        _ => {
            let mut message = format!(
                "{} {} health issue: {}, State: {}",
                kind.label(),
                component.component_name,
                component.health_status,
                component.state
            );
            match kind {
                ComponentType::Temperature => {
                    if let Some(reading) = reading(raw, "ReadingCelsius") {
                        message.push_str(&format!(" ({reading}°C)"));
                    }
                }
                ComponentType::Fan => {
                    if let Some(reading) = reading(raw, "Reading") {
                        message.push_str(&format!(" (Reading: {reading} RPM)"));
                    }
                }
                _ => {}
            }
            message
        }
    }
}

fn summary_message(component: &UnifiedComponent) -> String {
    let count = |key: &str| component.raw.get(key).and_then(Value::as_u64);

    match (count("degradedModules"), count("totalModules")) {
        (Some(bad), Some(total)) => format!("{bad} of {total} memory modules report degraded health"),
        _ => {
            let rollup = component
                .raw
                .get("healthRollup")
                .and_then(Value::as_str)
                .unwrap_or(component.health_status.as_str());
            format!("Memory summary health issue: {rollup}")
        }
    }
}

fn reading(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

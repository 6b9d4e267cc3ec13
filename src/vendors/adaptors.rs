use serde_json::Value;

use super::VendorAdaptor;
use crate::redfish::json::str_at;
use crate::{ComponentState, ComponentType, HealthStatus, UnifiedComponent};

/// Plain Redfish rules, used for unknown manufacturers.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAdaptor;

impl VendorAdaptor for GenericAdaptor {}

/// iLO 4 leaves empty DIMM slots `Enabled` and only marks them in the OEM block.
#[derive(Debug, Clone, Copy, Default)]
pub struct HpeAdaptor;

impl VendorAdaptor for HpeAdaptor {
    fn normalize_memory(&self, memory: &[Value]) -> Vec<UnifiedComponent> {
        let populated = memory
            .iter()
            .filter(|dimm| {
                let oem_status =
                    str_at(dimm, "/Oem/Hpe/DIMMStatus").or_else(|| str_at(dimm, "/Oem/Hp/DIMMStatus"));
                oem_status != Some("NotPresent")
            })
            .cloned()
            .collect::<Vec<_>>();

        GenericAdaptor.normalize_memory(&populated)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DellAdaptor;

impl VendorAdaptor for DellAdaptor {}

#[derive(Debug, Clone, Copy, Default)]
pub struct LenovoAdaptor;

impl VendorAdaptor for LenovoAdaptor {}

#[derive(Debug, Clone, Copy, Default)]
pub struct HuaweiAdaptor;

impl VendorAdaptor for HuaweiAdaptor {}

/// Fujitsu's memory roll-up is ignored by the analyzer, see
/// `AnalyzerConfig::memory_rollup_excluded_vendors`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FujitsuAdaptor;

impl VendorAdaptor for FujitsuAdaptor {}

/// Supermicro exposes every possible sensor slot. Unpopulated ones carry no
/// reading and no health.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupermicroAdaptor;

impl VendorAdaptor for SupermicroAdaptor {
    fn postprocess(&self, components: Vec<UnifiedComponent>) -> Vec<UnifiedComponent> {
        components
            .into_iter()
            .filter(|c| !is_unpopulated_sensor(c))
            .collect()
    }
}

fn is_unpopulated_sensor(component: &UnifiedComponent) -> bool {
    let reading_key = match component.component_type {
        ComponentType::Temperature => "ReadingCelsius",
        ComponentType::Fan => "Reading",
        _ => return false,
    };

    component.health_status == HealthStatus::Unknown
        && component.state != ComponentState::Enabled
        && component.raw.get(reading_key).is_none_or(Value::is_null)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InspurAdaptor;

impl VendorAdaptor for InspurAdaptor {}

#[derive(Debug, Clone, Copy, Default)]
pub struct CiscoAdaptor;

impl VendorAdaptor for CiscoAdaptor {}

#[derive(Debug, Clone, Copy, Default)]
pub struct GigabyteAdaptor;

impl VendorAdaptor for GigabyteAdaptor {}

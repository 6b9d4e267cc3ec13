//! Vendor normalization
//!
//! Every controller speaks its own dialect of Redfish. An adaptor maps the raw
//! resources of one [`RawInventory`] into [`UnifiedComponent`]s. Adaptors are
//! selected by [`select`] from the system's `Manufacturer` string; anything not
//! matching a registered vendor uses the generic rules.

mod adaptors;

use serde_json::Value;

pub use adaptors::{
    CiscoAdaptor, DellAdaptor, FujitsuAdaptor, GenericAdaptor, GigabyteAdaptor, HpeAdaptor,
    HuaweiAdaptor, InspurAdaptor, LenovoAdaptor, SupermicroAdaptor,
};

use crate::redfish::RawInventory;
use crate::redfish::json::{first_str, str_at};
use crate::{ComponentState, ComponentType, HealthStatus, UnifiedComponent};

const PROCESSOR_NAME_KEYS: &[&str] = &["Socket", "Id", "Name"];
const MEMORY_NAME_KEYS: &[&str] = &["DeviceLocator", "Id", "Name"];
const STORAGE_NAME_KEYS: &[&str] = &["Name", "Id", "Model"];
const POWER_NAME_KEYS: &[&str] = &["Name", "MemberId", "Id"];
const TEMPERATURE_NAME_KEYS: &[&str] = &["Name", "MemberId", "Id"];
const FAN_NAME_KEYS: &[&str] = &["Name", "FanName", "MemberId", "Id"];

/// Reads `Status{Health, State}`, falling back to flat `health_status`/`state`.
pub fn status_of(item: &Value) -> (HealthStatus, ComponentState) {
    let health = str_at(item, "/Status/Health")
        .or_else(|| str_at(item, "/health_status"))
        .map(HealthStatus::parse)
        .unwrap_or_default();
    let state = str_at(item, "/Status/State")
        .or_else(|| str_at(item, "/state"))
        .map(ComponentState::parse)
        .unwrap_or_default();
    (health, state)
}

fn component(
    kind: ComponentType,
    item: &Value,
    name_keys: &[&str],
    fallback: &str,
) -> UnifiedComponent {
    let (health, state) = status_of(item);
    let name = first_str(item, name_keys).unwrap_or_else(|| fallback.to_string());
    UnifiedComponent::new(kind, name, health, state).with_raw(item.clone())
}

/// Normalizes a list of items, dropping absent ones.
fn present(
    kind: ComponentType,
    items: &[Value],
    name_keys: &[&str],
    fallback: &str,
) -> Vec<UnifiedComponent> {
    items
        .iter()
        .map(|item| component(kind, item, name_keys, fallback))
        .filter(UnifiedComponent::is_present)
        .collect()
}

/// Normalization strategy for one vendor.
///
/// Every method has the generic behavior as its default, so a vendor only
/// overrides what its firmware actually gets wrong.
pub trait VendorAdaptor: Send + Sync {
    fn normalize_system(&self, system: &Value) -> UnifiedComponent {
        component(ComponentType::System, system, &[], "System")
    }

    fn normalize_processors(&self, processors: &[Value]) -> Vec<UnifiedComponent> {
        present(ComponentType::Processor, processors, PROCESSOR_NAME_KEYS, "Processor")
    }

    fn normalize_memory(&self, memory: &[Value]) -> Vec<UnifiedComponent> {
        present(ComponentType::Memory, memory, MEMORY_NAME_KEYS, "Memory")
    }

    /// Drives that omit `Health` while `Enabled` are reported as OK.
    fn normalize_storage(&self, storage: &[Value]) -> Vec<UnifiedComponent> {
        present(ComponentType::Storage, storage, STORAGE_NAME_KEYS, "Drive")
            .into_iter()
            .map(|mut drive| {
                if drive.health_status == HealthStatus::Unknown
                    && drive.state == ComponentState::Enabled
                {
                    drive.health_status = HealthStatus::Ok;
                }
                drive
            })
            .collect()
    }

    fn normalize_power(&self, power: &[Value]) -> Vec<UnifiedComponent> {
        present(ComponentType::Power, power, POWER_NAME_KEYS, "PowerSupply")
    }

    /// Returns temperatures and fans separately.
    fn normalize_thermal(
        &self,
        temperatures: &[Value],
        fans: &[Value],
    ) -> (Vec<UnifiedComponent>, Vec<UnifiedComponent>) {
        (
            present(ComponentType::Temperature, temperatures, TEMPERATURE_NAME_KEYS, "Temp"),
            present(ComponentType::Fan, fans, FAN_NAME_KEYS, "Fan"),
        )
    }

    /// Vendor specific last pass over the complete set.
    fn postprocess(&self, components: Vec<UnifiedComponent>) -> Vec<UnifiedComponent> {
        components
    }

    /// Runs every normalization step over a fetched inventory.
    fn normalize(&self, raw: &RawInventory) -> Vec<UnifiedComponent> {
        let mut components = Vec::new();

        if let Some(system) = &raw.system {
            let system = self.normalize_system(system);
            if system.is_present() {
                components.push(system);
            }
        }
        components.extend(self.normalize_processors(&raw.processors));
        components.extend(self.normalize_memory(&raw.memory));
        components.extend(self.normalize_storage(&raw.storage));
        components.extend(self.normalize_power(&raw.power));

        let (temperatures, fans) = self.normalize_thermal(&raw.temperatures, &raw.fans);
        components.extend(temperatures);
        components.extend(fans);

        let mut components = self.postprocess(components);
        components.retain(UnifiedComponent::is_present);
        components
    }
}

/// The closed set of supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Hpe,
    Dell,
    Lenovo,
    Huawei,
    Fujitsu,
    Supermicro,
    Inspur,
    Cisco,
    Gigabyte,
    Generic,
}

impl Vendor {
    /// Match order of [`select`]. The first vendor with a matching token wins.
    pub const REGISTERED: [Vendor; 9] = [
        Vendor::Hpe,
        Vendor::Dell,
        Vendor::Lenovo,
        Vendor::Huawei,
        Vendor::Fujitsu,
        Vendor::Supermicro,
        Vendor::Inspur,
        Vendor::Cisco,
        Vendor::Gigabyte,
    ];

    /// Uppercase substrings identifying this vendor in a manufacturer string.
    pub fn tokens(self) -> &'static [&'static str] {
        match self {
            Vendor::Hpe => &["HPE", "HEWLETT"],
            Vendor::Dell => &["DELL"],
            Vendor::Lenovo => &["LENOVO"],
            Vendor::Huawei => &["HUAWEI"],
            Vendor::Fujitsu => &["FUJITSU"],
            Vendor::Supermicro => &["SUPERMICRO", "SUPER MICRO", "SUPER SERVER"],
            Vendor::Inspur => &["INSPUR"],
            Vendor::Cisco => &["CISCO"],
            Vendor::Gigabyte => &["GIGABYTE"],
            Vendor::Generic => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Vendor::Hpe => "HPE",
            Vendor::Dell => "DELL",
            Vendor::Lenovo => "LENOVO",
            Vendor::Huawei => "HUAWEI",
            Vendor::Fujitsu => "FUJITSU",
            Vendor::Supermicro => "SUPERMICRO",
            Vendor::Inspur => "INSPUR",
            Vendor::Cisco => "CISCO",
            Vendor::Gigabyte => "GIGABYTE",
            Vendor::Generic => "GENERIC",
        }
    }

    pub fn adaptor(self) -> &'static dyn VendorAdaptor {
        match self {
            Vendor::Hpe => &HpeAdaptor,
            Vendor::Dell => &DellAdaptor,
            Vendor::Lenovo => &LenovoAdaptor,
            Vendor::Huawei => &HuaweiAdaptor,
            Vendor::Fujitsu => &FujitsuAdaptor,
            Vendor::Supermicro => &SupermicroAdaptor,
            Vendor::Inspur => &InspurAdaptor,
            Vendor::Cisco => &CiscoAdaptor,
            Vendor::Gigabyte => &GigabyteAdaptor,
            Vendor::Generic => &GenericAdaptor,
        }
    }

    /// Whether this vendor appears in a configured list of vendor names.
    pub fn is_listed(self, vendors: &[String]) -> bool {
        vendors.iter().any(|v| v.eq_ignore_ascii_case(self.name()))
    }
}

/// Picks the adaptor for a manufacturer string.
pub fn select(manufacturer: &str) -> Vendor {
    let upper = manufacturer.to_ascii_uppercase();
    Vendor::REGISTERED
        .into_iter()
        .find(|vendor| vendor.tokens().iter().any(|token| upper.contains(token)))
        .unwrap_or(Vendor::Generic)
}

//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redfish_monitoring::Device;
use redfish_monitoring::analyzer::{AnalyzerSettings, HealthAnalyzer};
use redfish_monitoring::config::RedfishConfig;
use redfish_monitoring::credentials::{CredentialStore, Credentials, DecryptionError};
use redfish_monitoring::monitors::{ConnectivityProbe, ProbeOutcome};
use redfish_monitoring::redfish::RedfishClient;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SESSION_PATH: &str = "/redfish/v1/SessionService/Sessions/1";

/// Management controller stand-in serving a small Redfish tree.
pub struct MockBmc {
    pub server: MockServer,
}

impl MockBmc {
    /// Lenovo box with every component OK.
    pub async fn healthy() -> Self {
        Self::with_power_supplies(&[("PSU1", "OK"), ("PSU2", "OK")]).await
    }

    /// Same tree, with the given power supply health values.
    pub async fn with_power_supplies(supplies: &[(&str, &str)]) -> Self {
        let bmc = Self::start().await;
        bmc.mount_login().await;
        bmc.mount_inventory(supplies).await;
        bmc
    }

    /// Controller that rejects every login.
    pub async fn rejecting_login() -> Self {
        let bmc = Self::start().await;
        Mock::given(method("POST"))
            .and(path("/redfish/v1/SessionService/Sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&bmc.server)
            .await;
        bmc
    }

    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn port(&self) -> u16 {
        self.server.address().port()
    }

    /// Number of requests the controller has seen so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    pub async fn mount_login(&self) {
        Mock::given(method("POST"))
            .and(path("/redfish/v1/SessionService/Sessions"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Auth-Token", "token-1")
                    .insert_header("Location", SESSION_PATH),
            )
            .mount(&self.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_inventory(&self, supplies: &[(&str, &str)]) {
        self.mount_tree(&Inventory {
            power_supplies: supplies.iter().map(|(name, health)| sensor(name, health)).collect(),
            ..Inventory::default()
        })
        .await;
    }

    /// Controller serving the given inventory.
    pub async fn with_inventory(inventory: &Inventory) -> Self {
        let bmc = Self::start().await;
        bmc.mount_login().await;
        bmc.mount_tree(inventory).await;
        bmc
    }

    pub async fn mount_tree(&self, inventory: &Inventory) {
        self.get(
            "/redfish/v1/Systems",
            json!({"Members": [{"@odata.id": "/redfish/v1/Systems/1"}]}),
        )
        .await;
        self.get(
            "/redfish/v1/Systems/1",
            json!({
                "@odata.id": "/redfish/v1/Systems/1",
                "Manufacturer": inventory.manufacturer,
                "Model": "ThinkSystem SR650",
                "SerialNumber": "J30001",
                "Status": {"Health": "OK", "State": "Enabled"},
                "MemorySummary": {"Status": {"HealthRollup": inventory.memory_rollup}}
            }),
        )
        .await;
        self.get(
            "/redfish/v1/Systems/1/Processors",
            json!({"Members": [
                {"Id": "CPU1", "Socket": "CPU 1", "Status": {"Health": "OK", "State": "Enabled"}},
                {"Id": "CPU2", "Socket": "CPU 2", "Status": {"Health": "OK", "State": "Enabled"}}
            ]}),
        )
        .await;
        if let Some(modules) = &inventory.memory {
            self.get("/redfish/v1/Systems/1/Memory", json!({"Members": modules}))
                .await;
        }
        self.get("/redfish/v1/Systems/1/Storage", json!({"Members": []}))
            .await;

        let chassis: Vec<Value> = (1..=inventory.chassis_fans.len())
            .map(|n| json!({"@odata.id": format!("/redfish/v1/Chassis/{n}")}))
            .collect();
        self.get("/redfish/v1/Chassis", json!({"Members": chassis}))
            .await;

        self.get(
            "/redfish/v1/Chassis/1/Power",
            json!({"PowerSupplies": inventory.power_supplies}),
        )
        .await;
        for (index, fans) in inventory.chassis_fans.iter().enumerate() {
            self.get(
                &format!("/redfish/v1/Chassis/{}/Thermal", index + 1),
                json!({
                    "Temperatures": [{"Name": "Ambient", "ReadingCelsius": 22, "Status": {"Health": "OK", "State": "Enabled"}}],
                    "Fans": fans
                }),
            )
            .await;
        }
    }

    /// A SEL on the system and an empty MEL on the manager. Entries are
    /// `(id, severity, created, message)`.
    pub async fn mount_logs(&self, sel: &[(&str, &str, &str, &str)]) {
        self.get(
            "/redfish/v1/Managers",
            json!({"Members": [{"@odata.id": "/redfish/v1/Managers/1"}]}),
        )
        .await;
        self.get(
            "/redfish/v1/Managers/1/LogServices",
            json!({"Members": [{
                "@odata.id": "/redfish/v1/Managers/1/LogServices/MEL",
                "Id": "MEL",
                "Entries": {"@odata.id": "/redfish/v1/Managers/1/LogServices/MEL/Entries"}
            }]}),
        )
        .await;
        self.get(
            "/redfish/v1/Managers/1/LogServices/MEL/Entries",
            json!({"Members": []}),
        )
        .await;
        self.get(
            "/redfish/v1/Systems/1/LogServices",
            json!({"Members": [{
                "@odata.id": "/redfish/v1/Systems/1/LogServices/SEL",
                "Id": "SEL",
                "Entries": {"@odata.id": "/redfish/v1/Systems/1/LogServices/SEL/Entries"}
            }]}),
        )
        .await;

        let entries: Vec<Value> = sel
            .iter()
            .map(|(id, severity, created, message)| {
                json!({"Id": id, "Severity": severity, "Created": created, "Message": message})
            })
            .collect();
        self.get(
            "/redfish/v1/Systems/1/LogServices/SEL/Entries",
            json!({"Members": entries}),
        )
        .await;
    }

    /// Log services that answer only after `delay`.
    pub async fn mount_stalled_logs(&self, delay: Duration) {
        for resource in ["/redfish/v1/Managers", "/redfish/v1/Systems/1/LogServices"] {
            Mock::given(method("GET"))
                .and(path(resource))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"Members": []}))
                        .set_delay(delay),
                )
                .mount(&self.server)
                .await;
        }
    }

    async fn get(&self, resource: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(resource))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }
}

/// Redfish tree served by [`MockBmc::with_inventory`]. The default is a
/// healthy Lenovo box with one chassis.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub manufacturer: &'static str,
    pub memory_rollup: &'static str,
    /// `None` leaves the Memory collection unanswered
    pub memory: Option<Vec<Value>>,
    pub power_supplies: Vec<Value>,
    /// Fans of each chassis, one entry per chassis
    pub chassis_fans: Vec<Vec<Value>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            manufacturer: "Lenovo",
            memory_rollup: "OK",
            memory: Some(vec![
                dimm("DIMM A1", "OK"),
                json!({"DeviceLocator": "DIMM A2", "Status": {"State": "Absent"}}),
            ]),
            power_supplies: vec![sensor("PSU1", "OK"), sensor("PSU2", "OK")],
            chassis_fans: vec![vec![json!({"Name": "Fan1", "Reading": 5400, "Status": {"Health": "OK", "State": "Enabled"}})]],
        }
    }
}

pub fn dimm(locator: &str, health: &str) -> Value {
    json!({"DeviceLocator": locator, "Status": {"Health": health, "State": "Enabled"}})
}

/// Power supply or fan entry named `Name`.
pub fn sensor(name: &str, health: &str) -> Value {
    json!({"Name": name, "Status": {"Health": health, "State": "Enabled"}})
}

/// Connectivity probe with fixed answers. Addresses are online unless listed.
#[derive(Debug, Default)]
pub struct StaticProbe {
    offline: HashSet<IpAddr>,
    pub calls: AtomicUsize,
}

impl StaticProbe {
    pub fn with_offline(addresses: &[&str]) -> Self {
        Self {
            offline: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn probe(&self, ip: IpAddr, ports: &[u16]) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let online = !self.offline.contains(&ip);
        ProbeOutcome {
            online,
            ping_ok: online,
            open_ports: if online { ports.to_vec() } else { Vec::new() },
            latency_ms: online.then_some(0.4),
            detail: if online {
                "ping ok".to_string()
            } else {
                format!("ping failed, tcp ports {ports:?} closed")
            },
        }
    }
}

/// Credential store that counts lookups.
#[derive(Debug, Default)]
pub struct CountingCredentialStore {
    pub lookups: AtomicUsize,
}

impl CountingCredentialStore {
    pub fn count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl CredentialStore for CountingCredentialStore {
    fn decrypt(&self, reference: &str) -> Result<Credentials, DecryptionError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match reference {
            "missing" => Err(DecryptionError::UnknownReference(reference.to_string())),
            _ => Ok(Credentials::new("admin", "secret")),
        }
    }
}

/// Device whose controller is served on `127.0.0.1:oob_port`.
pub fn device(id: &str, business_ip: &str, oob_port: u16) -> Device {
    Device {
        id: id.to_string(),
        hostname: format!("{id}.dc1"),
        business_ip: Some(business_ip.parse().unwrap()),
        oob_ip: "127.0.0.1".parse().unwrap(),
        oob_port,
        credential_ref: "bmc-admin".to_string(),
        business_type: None,
        monitor_enabled: true,
    }
}

pub fn plain_http_client() -> RedfishClient {
    RedfishClient::new(&RedfishConfig {
        scheme: "http".to_string(),
        verify_tls: false,
        request_timeout_secs: 5,
        connection_test_timeout_secs: 5,
    })
    .unwrap()
}

pub fn analyzer(
    probe: Arc<dyn ConnectivityProbe>,
    credentials: Arc<dyn CredentialStore>,
) -> HealthAnalyzer {
    HealthAnalyzer::new(probe, credentials, plain_http_client(), AnalyzerSettings::default())
}

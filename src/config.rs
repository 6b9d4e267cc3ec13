use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use tracing::trace;

use crate::UrgencyLevel;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Overrides `scan.resolved_retention_days` for this database
        retention_days: Option<u32>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: None,
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./alerts.db")
}

fn default_retention_days() -> u32 {
    30
}

/// Cross-process event bus configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BusConfig {
    /// Single process, events stay local
    #[default]
    Local,

    /// MQTT broker shared by all hub instances
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        #[serde(default = "default_mqtt_client_id")]
        client_id: String,
        #[serde(default = "default_topic_prefix")]
        topic_prefix: String,
    },
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    format!("redfish-hub-{}", uuid::Uuid::new_v4().simple())
}

fn default_topic_prefix() -> String {
    "redfish/realtime".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub redfish: RedfishConfig,

    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub urgency_rules: Vec<UrgencyRuleConfig>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,

    pub api: Option<ApiSection>,

    #[serde(default)]
    pub bus: BusConfig,
}

impl Config {
    /// Days a resolved alert is kept before the daily cleanup deletes it.
    pub fn resolved_retention_days(&self) -> u32 {
        match &self.storage {
            Some(StorageConfig::Sqlite {
                retention_days: Some(days),
                ..
            }) => *days,
            _ => self.scan.resolved_retention_days,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub hostname: String,
    pub business_ip: Option<IpAddr>,
    pub oob_ip: IpAddr,
    #[serde(default = "default_oob_port")]
    pub oob_port: u16,
    pub credential_ref: String,
    pub business_type: Option<String>,
    #[serde(default = "default_true")]
    pub monitor_enabled: bool,
}

fn default_oob_port() -> u16 {
    443
}

fn default_true() -> bool {
    true
}

/// Controller login. The password comes either inline or from an
/// environment variable.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CredentialConfig {
    pub username: String,
    pub password: Option<String>,
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScanConfig {
    /// Run a fleet scan on this interval. Without it scans are manual only.
    pub interval_secs: Option<u64>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_per_device_timeout")]
    pub per_device_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_min_trigger_interval")]
    pub min_trigger_interval_secs: u64,
    #[serde(default)]
    pub collect_logs: bool,
    #[serde(default = "default_log_max_entries")]
    pub log_max_entries: usize,
    #[serde(default = "default_retention_days")]
    pub resolved_retention_days: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            concurrency: default_concurrency(),
            per_device_timeout_secs: default_per_device_timeout(),
            retry: RetryConfig::default(),
            min_trigger_interval_secs: default_min_trigger_interval(),
            collect_logs: false,
            log_max_entries: default_log_max_entries(),
            resolved_retention_days: default_retention_days(),
        }
    }
}

fn default_concurrency() -> usize {
    16
}

fn default_per_device_timeout() -> u64 {
    120
}

fn default_min_trigger_interval() -> u64 {
    30
}

fn default_log_max_entries() -> usize {
    100
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RedfishConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connection_test_timeout")]
    pub connection_test_timeout_secs: u64,
}

impl Default for RedfishConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            verify_tls: false,
            request_timeout_secs: default_request_timeout(),
            connection_test_timeout_secs: default_connection_test_timeout(),
        }
    }
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connection_test_timeout() -> u64 {
    6
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_true")]
    pub use_ping: bool,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout_secs: u64,
    #[serde(default = "default_business_ports")]
    pub business_ports: Vec<u16>,
    #[serde(default = "default_oob_ports")]
    pub oob_ports: Vec<u16>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            use_ping: true,
            ping_timeout_secs: default_ping_timeout(),
            tcp_timeout_secs: default_tcp_timeout(),
            business_ports: default_business_ports(),
            oob_ports: default_oob_ports(),
        }
    }
}

fn default_ping_timeout() -> u64 {
    3
}

fn default_tcp_timeout() -> u64 {
    2
}

fn default_business_ports() -> Vec<u16> {
    vec![22, 80, 443]
}

fn default_oob_ports() -> Vec<u16> {
    vec![443, 80, 22]
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AnalyzerConfig {
    /// Vendors whose memory health roll-up is not trusted.
    #[serde(default = "default_rollup_exclusions")]
    pub memory_rollup_excluded_vendors: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            memory_rollup_excluded_vendors: default_rollup_exclusions(),
        }
    }
}

fn default_rollup_exclusions() -> Vec<String> {
    vec!["FUJITSU".to_string()]
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UrgencyRuleConfig {
    pub business_type: String,
    pub hardware_type: String,
    pub urgency: UrgencyLevel,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSection {
    pub bind: Option<SocketAddr>,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config: &Config| trace!("loaded config with {} devices", config.devices.len()))
}

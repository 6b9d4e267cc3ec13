//! Redfish HTTP client and authenticated sessions

use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, LOCATION};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, trace, warn};

use super::error::RedfishError;
use super::inventory::{RawInventory, SystemInfo};
use super::json::{array_at, is_expanded, member_uris, odata_id};
use super::logs::{LogEntry, LogQuery, LogSource, filter_entries};
use crate::Subsystem;
use crate::config::RedfishConfig;
use crate::credentials::Credentials;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SESSIONS_PATH: &str = "/redfish/v1/SessionService/Sessions";
const SYSTEMS_PATH: &str = "/redfish/v1/Systems";
const CHASSIS_PATH: &str = "/redfish/v1/Chassis";
const MANAGERS_PATH: &str = "/redfish/v1/Managers";

const LOG_ENTRY_ATTEMPTS: u32 = 3;
const LOG_ENTRY_RETRY_PAUSE: Duration = Duration::from_millis(500);
const MAX_LOG_PAGES: usize = 20;

/// Address of a management controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmcEndpoint {
    pub host: String,
    pub port: u16,
}

impl BmcEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BmcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Shared HTTP client for all controllers.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct RedfishClient {
    http: reqwest::Client,
    scheme: String,
    request_timeout: Duration,
}

impl RedfishClient {
    pub fn new(config: &RedfishConfig) -> Result<Self, RedfishError> {
        // Controllers ship self-signed certificates almost universally.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| RedfishError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            scheme: config.scheme.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Opens an authenticated session.
    ///
    /// This is the only fatal step: every later fetch degrades instead of failing.
    #[instrument(skip(self, credentials), fields(bmc = %endpoint))]
    pub async fn connect(
        &self,
        endpoint: &BmcEndpoint,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<RedfishSession, RedfishError> {
        let base_url = format!("{}://{}", self.scheme, endpoint);

        trace!("opening session at {base_url}");

        let response = self
            .http
            .post(format!("{base_url}{SESSIONS_PATH}"))
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .json(&json!({
                "UserName": credentials.username,
                "Password": credentials.password,
            }))
            .send()
            .await
            .map_err(|e| RedfishError::from_transport(e, SESSIONS_PATH))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            return Err(RedfishError::AuthFailed(format!("{status} on {SESSIONS_PATH}")));
        }
        if !status.is_success() {
            return Err(RedfishError::from_status(status, SESSIONS_PATH));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let token = header(AUTH_TOKEN_HEADER)
            .ok_or_else(|| RedfishError::malformed(SESSIONS_PATH, "no X-Auth-Token header"))?;
        let location = header(LOCATION.as_str());

        debug!("session established");

        Ok(RedfishSession {
            http: self.http.clone(),
            base_url,
            token,
            location,
            timeout,
            system_uri: OnceCell::new(),
            chassis_uris: OnceCell::new(),
            closed: false,
        })
    }

    /// Connects, fetches every subsystem and logs out again.
    ///
    /// Fails only when no session could be opened or when every single
    /// subsystem failed.
    pub async fn collect_inventory(
        &self,
        endpoint: &BmcEndpoint,
        credentials: &Credentials,
    ) -> Result<RawInventory, RedfishError> {
        let session = self
            .connect(endpoint, credentials, self.request_timeout)
            .await?;
        let inventory = session.fetch_all().await;
        session.close().await;

        if inventory.degraded.len() == SUBSYSTEM_COUNT
            && let Some(first) = inventory.degraded.first()
        {
            return Err(first.error.clone());
        }

        Ok(inventory)
    }

    /// Connects, reads event logs and logs out again.
    pub async fn collect_logs(
        &self,
        endpoint: &BmcEndpoint,
        credentials: &Credentials,
        query: &LogQuery,
    ) -> Result<Vec<LogEntry>, RedfishError> {
        let session = self
            .connect(endpoint, credentials, self.request_timeout)
            .await?;
        let entries = session.fetch_logs(query).await;
        session.close().await;
        entries
    }
}

const SUBSYSTEM_COUNT: usize = 6;

/// An authenticated Redfish session.
///
/// Call [`RedfishSession::close`] when done. A session dropped while still
/// open (e.g. because its scan was cancelled) logs itself out in the background.
pub struct RedfishSession {
    http: reqwest::Client,
    base_url: String,
    token: String,
    location: Option<String>,
    timeout: Duration,
    system_uri: OnceCell<String>,
    chassis_uris: OnceCell<Vec<String>>,
    closed: bool,
}

impl fmt::Debug for RedfishSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedfishSession")
            .field("base_url", &self.base_url)
            .field("location", &self.location)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RedfishSession {
    fn url_for(&self, resource: &str) -> String {
        if resource.starts_with("http://") || resource.starts_with("https://") {
            resource.to_string()
        } else {
            format!("{}{}", self.base_url, resource)
        }
    }

    /// GET a resource and decode it as JSON.
    pub async fn get_json(&self, resource: &str) -> Result<Value, RedfishError> {
        trace!("GET {resource}");

        let response = self
            .http
            .get(self.url_for(resource))
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RedfishError::from_transport(e, resource))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RedfishError::from_status(status, resource));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| RedfishError::malformed(resource, e.to_string()))
    }

    async fn get_json_with_retry(&self, resource: &str) -> Result<Value, RedfishError> {
        let mut attempt = 1;
        loop {
            match self.get_json(resource).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < LOG_ENTRY_ATTEMPTS => {
                    trace!("attempt {attempt} for {resource} failed: {e}");
                    attempt += 1;
                    tokio::time::sleep(LOG_ENTRY_RETRY_PAUSE).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn system_uri(&self) -> Result<&str, RedfishError> {
        self.system_uri
            .get_or_try_init(|| async {
                let systems = self.get_json(SYSTEMS_PATH).await?;
                member_uris(&systems)
                    .into_iter()
                    .next()
                    .ok_or_else(|| RedfishError::malformed(SYSTEMS_PATH, "no system members"))
            })
            .await
            .map(String::as_str)
    }

    async fn chassis_uris(&self) -> Result<&[String], RedfishError> {
        self.chassis_uris
            .get_or_try_init(|| async {
                let chassis = self.get_json(CHASSIS_PATH).await?;
                Ok::<_, RedfishError>(member_uris(&chassis))
            })
            .await
            .map(Vec::as_slice)
    }

    /// Every member of a collection, fetching members that are only links.
    /// Members that fail to load are skipped.
    async fn fetch_members(&self, collection_uri: &str) -> Result<Vec<Value>, RedfishError> {
        let collection = self.get_json(collection_uri).await?;
        Ok(self.expand_members(array_at(&collection, "Members")).await)
    }

    async fn expand_members(&self, members: &[Value]) -> Vec<Value> {
        let fetches = members.iter().map(|member| async move {
            if is_expanded(member) {
                return Some(member.clone());
            }
            let link = odata_id(member)?;
            match self.get_json(link).await {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("skipping member {link}: {e}");
                    None
                }
            }
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }

    pub async fn system_info(&self) -> Result<SystemInfo, RedfishError> {
        let system = self.fetch_system().await?;
        Ok(SystemInfo::from_system(&system))
    }

    /// Fetches all six subsystems concurrently.
    pub async fn fetch_all(&self) -> RawInventory {
        let (system, processors, memory, storage, power, thermal) = tokio::join!(
            self.fetch_system(),
            self.fetch_processors(),
            self.fetch_memory(),
            self.fetch_storage(),
            self.fetch_power(),
            self.fetch_thermal(),
        );

        let mut inventory = RawInventory::default();

        match system {
            Ok(system) => inventory.system = Some(system),
            Err(e) => inventory.degrade(Subsystem::System, e),
        }
        match processors {
            Ok(items) => inventory.processors = items,
            Err(e) => inventory.degrade(Subsystem::Processors, e),
        }
        match memory {
            Ok(items) => inventory.memory = items,
            Err(e) => inventory.degrade(Subsystem::Memory, e),
        }
        match storage {
            Ok(items) => inventory.storage = items,
            Err(e) => inventory.degrade(Subsystem::Storage, e),
        }
        match power {
            Ok(items) => inventory.power = items,
            Err(e) => inventory.degrade(Subsystem::Power, e),
        }
        match thermal {
            Ok((temperatures, fans)) => {
                inventory.temperatures = temperatures;
                inventory.fans = fans;
            }
            Err(e) => inventory.degrade(Subsystem::Thermal, e),
        }

        for degraded in &inventory.degraded {
            warn!("{} unavailable: {}", degraded.subsystem, degraded.error);
        }

        inventory
    }

    async fn fetch_system(&self) -> Result<Value, RedfishError> {
        let uri = self.system_uri().await?;
        self.get_json(uri).await
    }

    async fn fetch_processors(&self) -> Result<Vec<Value>, RedfishError> {
        let system = self.system_uri().await?;
        self.fetch_members(&format!("{system}/Processors")).await
    }

    async fn fetch_memory(&self) -> Result<Vec<Value>, RedfishError> {
        let system = self.system_uri().await?;
        self.fetch_members(&format!("{system}/Memory")).await
    }

    async fn fetch_storage(&self) -> Result<Vec<Value>, RedfishError> {
        let system = self.system_uri().await?;
        let controllers = self.fetch_members(&format!("{system}/Storage")).await?;

        let drives: Vec<Value> = controllers
            .iter()
            .flat_map(|controller| array_at(controller, "Drives").iter().cloned())
            .collect();

        Ok(self.expand_members(&drives).await)
    }

    async fn fetch_power(&self) -> Result<Vec<Value>, RedfishError> {
        let chassis = self.chassis_uris().await?;
        let results = join_all(
            chassis
                .iter()
                .map(|uri| async move { self.get_json(&format!("{uri}/Power")).await }),
        )
        .await;

        merge_chassis(results, |power, out| {
            out.extend_from_slice(array_at(power, "PowerSupplies"))
        })
    }

    async fn fetch_thermal(&self) -> Result<(Vec<Value>, Vec<Value>), RedfishError> {
        let chassis = self.chassis_uris().await?;
        let results = join_all(
            chassis
                .iter()
                .map(|uri| async move { self.get_json(&format!("{uri}/Thermal")).await }),
        )
        .await;

        let thermals = merge_chassis(results, |thermal, out| out.push(thermal.clone()))?;
        let temperatures = thermals
            .iter()
            .flat_map(|t| array_at(t, "Temperatures").iter().cloned())
            .collect();
        let fans = thermals
            .iter()
            .flat_map(|t| array_at(t, "Fans").iter().cloned())
            .collect();

        Ok((temperatures, fans))
    }

    /// Reads SEL/MEL entries matching `query`.
    ///
    /// Fails only when no log service could be discovered at all.
    #[instrument(skip(self), fields(bmc = %self.base_url))]
    pub async fn fetch_logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, RedfishError> {
        let services = self.discover_log_services().await?;

        let reads = services
            .iter()
            .filter(|(source, _)| query.kind.includes(*source))
            .map(|(source, service)| self.read_log_service(*source, service));

        let mut entries = Vec::new();
        for batch in join_all(reads).await {
            match batch {
                Ok(batch) => entries.extend(batch),
                Err(e) => warn!("failed to read log service: {e}"),
            }
        }

        debug!("read {} degraded log entries", entries.len());
        Ok(filter_entries(entries, query))
    }

    async fn discover_log_services(&self) -> Result<Vec<(LogSource, Value)>, RedfishError> {
        let (managers, systems) =
            tokio::join!(self.get_json(MANAGERS_PATH), self.get_json(SYSTEMS_PATH));

        let owners: Vec<String> = match (managers, systems) {
            (Err(e), Err(_)) => return Err(e),
            (managers, systems) => [managers, systems]
                .into_iter()
                .flatten()
                .flat_map(|collection| member_uris(&collection))
                .collect(),
        };

        let listings = join_all(
            owners
                .iter()
                .map(|owner| async move { self.fetch_members(&format!("{owner}/LogServices")).await }),
        )
        .await;

        Ok(listings
            .into_iter()
            .filter_map(Result::ok)
            .flatten()
            .filter_map(|service| LogSource::classify(&service).map(|source| (source, service)))
            .collect())
    }

    async fn read_log_service(
        &self,
        source: LogSource,
        service: &Value,
    ) -> Result<Vec<LogEntry>, RedfishError> {
        let service_id = odata_id(service).unwrap_or("LogService");
        let mut next = service
            .pointer("/Entries/@odata.id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| odata_id(service).map(|id| format!("{id}/Entries")))
            .ok_or_else(|| RedfishError::malformed(service_id, "no Entries link"))?;

        let mut entries = Vec::new();

        for _ in 0..MAX_LOG_PAGES {
            let page = self.get_json(&next).await?;

            let loads = array_at(&page, "Members").iter().map(|member| async move {
                if is_expanded(member) {
                    return Some(member.clone());
                }
                let link = odata_id(member)?;
                match self.get_json_with_retry(link).await {
                    Ok(value) => Some(value),
                    Err(e) => {
                        debug!("giving up on log entry {link}: {e}");
                        None
                    }
                }
            });

            entries.extend(
                join_all(loads)
                    .await
                    .into_iter()
                    .flatten()
                    .filter_map(|raw| LogEntry::from_redfish(&raw, source)),
            );

            match page.get("Members@odata.nextLink").and_then(Value::as_str) {
                Some(link) => next = link.to_string(),
                None => break,
            }
        }

        Ok(entries)
    }

    /// Logs the session out.
    pub async fn close(mut self) {
        self.closed = true;

        let Some(url) = self.logout_url() else {
            trace!("no session location, nothing to delete");
            return;
        };

        match self
            .http
            .delete(&url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => trace!("session closed"),
            Ok(response) => debug!("session logout returned {}", response.status()),
            Err(e) => debug!("session logout failed: {e}"),
        }
    }

    fn logout_url(&self) -> Option<String> {
        self.location.as_deref().map(|location| self.url_for(location))
    }
}

impl Drop for RedfishSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(url) = self.logout_url() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("session at {} dropped outside a runtime", self.base_url);
            return;
        };

        debug!("session dropped while open, logging out in background");

        let http = self.http.clone();
        let token = std::mem::take(&mut self.token);
        let timeout = self.timeout;
        runtime.spawn(async move {
            let _ = http
                .delete(url)
                .header(AUTH_TOKEN_HEADER, token)
                .timeout(timeout)
                .send()
                .await;
        });
    }
}

/// Merges per-chassis results. Chassis without the resource are skipped,
/// but if every chassis failed the subsystem as a whole failed.
fn merge_chassis(
    results: Vec<Result<Value, RedfishError>>,
    mut extract: impl FnMut(&Value, &mut Vec<Value>),
) -> Result<Vec<Value>, RedfishError> {
    let mut merged = Vec::new();
    let mut last_error = None;
    let mut any_ok = false;

    for result in results {
        match result {
            Ok(value) => {
                any_ok = true;
                extract(&value, &mut merged);
            }
            Err(e) => {
                trace!("chassis resource unavailable: {e}");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !any_ok => Err(e),
        _ => Ok(merged),
    }
}

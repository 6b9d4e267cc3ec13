use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use crate::config::ConnectivityConfig;

static PING_LATENCY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"time[=<]\s*([0-9.]+)\s*ms").ok());

/// Reachability of one address.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub online: bool,
    pub ping_ok: bool,
    pub open_ports: Vec<u16>,
    pub latency_ms: Option<f64>,
    /// Short human readable summary, used in alert messages.
    pub detail: String,
}

impl ProbeOutcome {
    fn summarize(mut self, ports: &[u16]) -> Self {
        self.online = self.ping_ok || !self.open_ports.is_empty();
        self.detail = if self.ping_ok {
            match self.latency_ms {
                Some(latency) => format!("ping ok, {latency:.1} ms"),
                None => "ping ok".to_string(),
            }
        } else if self.online {
            format!("ping failed, tcp ports {:?} open", self.open_ports)
        } else {
            format!("ping failed, tcp ports {ports:?} closed")
        };
        self
    }
}

/// Checks whether an address answers at all. Independent of Redfish.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, ip: IpAddr, ports: &[u16]) -> ProbeOutcome;
}

/// Probes with the system `ping` binary, then TCP connects when ping fails.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    use_ping: bool,
    ping_timeout: Duration,
    tcp_timeout: Duration,
}

impl SystemProbe {
    pub fn new(config: &ConnectivityConfig) -> Self {
        Self {
            use_ping: config.use_ping,
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
            tcp_timeout: Duration::from_secs(config.tcp_timeout_secs),
        }
    }

    async fn ping(&self, ip: IpAddr) -> Option<Option<f64>> {
        let mut command = Command::new("ping");
        if ip.is_ipv6() {
            command.arg("-6");
        }
        command
            .args(["-c", "1", "-W"])
            .arg(self.ping_timeout.as_secs().max(1).to_string())
            .arg(ip.to_string())
            .kill_on_drop(true);

        // the -W deadline is per reply, guard the whole process as well
        let output = tokio::time::timeout(self.ping_timeout + Duration::from_secs(1), command.output())
            .await
            .ok()?
            .inspect_err(|e| debug!("ping unavailable: {e}"))
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(parse_latency(&stdout))
    }

    async fn tcp_check(&self, ip: IpAddr, port: u16) -> bool {
        let addr = SocketAddr::new(ip, port);
        matches!(
            tokio::time::timeout(self.tcp_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl ConnectivityProbe for SystemProbe {
    #[instrument(skip(self))]
    async fn probe(&self, ip: IpAddr, ports: &[u16]) -> ProbeOutcome {
        let started = Instant::now();
        let mut outcome = ProbeOutcome::default();

        if self.use_ping
            && let Some(latency) = self.ping(ip).await
        {
            outcome.ping_ok = true;
            outcome.latency_ms = latency;
            return outcome.summarize(ports);
        }

        let checks = ports.iter().map(|&port| async move { (port, self.tcp_check(ip, port).await) });
        outcome.open_ports = join_all(checks)
            .await
            .into_iter()
            .filter_map(|(port, open)| open.then_some(port))
            .collect();

        if !outcome.open_ports.is_empty() {
            outcome.latency_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
        }

        trace!("tcp probe found open ports {:?}", outcome.open_ports);
        outcome.summarize(ports)
    }
}

fn parse_latency(ping_output: &str) -> Option<f64> {
    PING_LATENCY
        .as_ref()?
        .captures(ping_output)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Port list for the management address: the configured controller port
/// first, then the usual suspects.
pub fn oob_ports(oob_port: u16, defaults: &[u16]) -> Vec<u16> {
    std::iter::once(oob_port)
        .chain(defaults.iter().copied().filter(|&p| p != oob_port))
        .collect()
}

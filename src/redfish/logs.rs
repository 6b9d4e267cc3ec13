//! Event log entries (SEL/MEL) and their incremental filtering

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::json::{first_str, odata_id};

const SEL_SERVICE_IDS: &[&str] = &["sel", "systemlog", "systemlogservice", "iml"];
const MEL_SERVICE_IDS: &[&str] = &["mel", "managementlog", "iel", "managereventlog"];

/// Which event log an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSource {
    Sel,
    Mel,
}

impl LogSource {
    pub const ALL: [LogSource; 2] = [LogSource::Sel, LogSource::Mel];

    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Sel => "SEL",
            LogSource::Mel => "MEL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "SEL" => Some(LogSource::Sel),
            "MEL" => Some(LogSource::Mel),
            _ => None,
        }
    }

    /// Classifies a LogService resource by its `Id` or `Name`.
    pub fn classify(service: &Value) -> Option<Self> {
        let candidates = ["Id", "Name"]
            .iter()
            .filter_map(|key| service.get(*key).and_then(Value::as_str))
            .map(|s| s.to_ascii_lowercase().replace([' ', '_', '-'], ""))
            .collect::<Vec<_>>();

        if candidates.iter().any(|c| SEL_SERVICE_IDS.contains(&c.as_str())) {
            Some(LogSource::Sel)
        } else if candidates.iter().any(|c| MEL_SERVICE_IDS.contains(&c.as_str())) {
            Some(LogSource::Mel)
        } else {
            None
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which logs a fetch should read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Sel,
    Mel,
    #[default]
    All,
}

impl LogKind {
    pub fn includes(self, source: LogSource) -> bool {
        match self {
            LogKind::All => true,
            LogKind::Sel => source == LogSource::Sel,
            LogKind::Mel => source == LogSource::Mel,
        }
    }
}

impl From<LogSource> for LogKind {
    fn from(source: LogSource) -> Self {
        match source {
            LogSource::Sel => LogKind::Sel,
            LogSource::Mel => LogKind::Mel,
        }
    }
}

/// Only degraded severities are kept; `OK` entries never make it this far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogSeverity {
    Warning,
    Critical,
}

impl LogSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSeverity::Warning => "Warning",
            LogSeverity::Critical => "Critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "warning" => Some(LogSeverity::Warning),
            "critical" => Some(LogSeverity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub entry_id: String,
    pub severity: LogSeverity,
    pub created: Option<DateTime<Utc>>,
    pub message: String,
    pub source: LogSource,
    pub sensor_type: Option<String>,
}

impl LogEntry {
    /// Parses a Redfish LogEntry, falling back to `Oem.Hpe` for iLO firmware
    /// that only fills the vendor block.
    ///
    /// Returns `None` for repaired entries and anything not Warning/Critical.
    pub fn from_redfish(raw: &Value, source: LogSource) -> Option<Self> {
        let field = |key: &str| {
            raw.get(key)
                .filter(|v| !v.is_null())
                .or_else(|| raw.pointer(&format!("/Oem/Hpe/{key}")))
        };

        if field("Repaired").and_then(Value::as_bool) == Some(true) {
            return None;
        }

        let severity = field("Severity")
            .and_then(Value::as_str)
            .and_then(LogSeverity::parse)?;

        let entry_id = first_str(raw, &["Id"])
            .or_else(|| odata_id(raw).and_then(|id| id.rsplit('/').next()).map(str::to_string))?;

        let created = field("Created")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let message = field("Message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        Some(Self {
            entry_id,
            severity,
            created,
            message,
            source,
            sensor_type: first_str(raw, &["SensorType"]),
        })
    }

    /// Whether this entry lies beyond the collection watermark.
    ///
    /// Numeric ids compare numerically, other ids only have to differ.
    /// Timestamps have to be strictly newer.
    pub fn is_newer_than(
        &self,
        since_entry_id: Option<&str>,
        since_timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(since) = since_entry_id {
            let newer = match (self.entry_id.parse::<u64>(), since.parse::<u64>()) {
                (Ok(id), Ok(since)) => id > since,
                _ => self.entry_id != since,
            };
            if !newer {
                return false;
            }
        }

        match (self.created, since_timestamp) {
            (Some(created), Some(since)) => created > since,
            _ => true,
        }
    }

    fn newest_first(a: &LogEntry, b: &LogEntry) -> Ordering {
        match (a.created, b.created) {
            (Some(a_ts), Some(b_ts)) if a_ts != b_ts => b_ts.cmp(&a_ts),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            _ => match (a.entry_id.parse::<u64>(), b.entry_id.parse::<u64>()) {
                (Ok(a_id), Ok(b_id)) => b_id.cmp(&a_id),
                _ => b.entry_id.cmp(&a.entry_id),
            },
        }
    }
}

/// Parameters of one incremental log read.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub kind: LogKind,
    pub max_entries: usize,
    pub since_entry_id: Option<String>,
    pub since_timestamp: Option<DateTime<Utc>>,
}

/// Applies the watermark, orders newest-first, keeps the newest entry per
/// message text and truncates to `max_entries` (0 means unlimited).
pub fn filter_entries(mut entries: Vec<LogEntry>, query: &LogQuery) -> Vec<LogEntry> {
    entries.retain(|entry| {
        query.kind.includes(entry.source)
            && entry.is_newer_than(query.since_entry_id.as_deref(), query.since_timestamp)
    });
    entries.sort_by(LogEntry::newest_first);

    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.message.clone()));

    if query.max_entries > 0 {
        entries.truncate(query.max_entries);
    }
    entries
}

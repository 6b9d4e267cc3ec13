//! Incremental SEL/MEL collection
//!
//! Each device keeps one watermark per log source in the alert store. A
//! collection run only reads entries past the watermark, stores the new ones
//! and moves the watermark to the newest entry read.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::credentials::CredentialStore;
use crate::redfish::{LogEntry, LogQuery, LogSeverity, LogSource, RedfishClient};
use crate::storage::AlertStore;
use crate::Device;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub source: LogSource,
    /// Entries read past the watermark
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    /// Entries the store had not seen before
    pub stored: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCollectionSummary {
    pub device_id: String,
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub sources: Vec<SourceSummary>,
}

impl LogCollectionSummary {
    fn add(&mut self, source: SourceSummary) {
        self.total += source.total;
        self.critical += source.critical;
        self.warning += source.warning;
        self.sources.push(source);
    }
}

pub struct LogCollector {
    client: RedfishClient,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<dyn AlertStore>,
    max_entries: usize,
}

impl LogCollector {
    pub fn new(
        client: RedfishClient,
        credentials: Arc<dyn CredentialStore>,
        store: Arc<dyn AlertStore>,
        max_entries: usize,
    ) -> Self {
        Self {
            client,
            credentials,
            store,
            max_entries,
        }
    }

    /// Reads new SEL and MEL entries of one device. `force_refresh` ignores
    /// the stored watermarks and reads from the start.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn collect(&self, device: &Device, force_refresh: bool) -> Result<LogCollectionSummary> {
        let credentials = self
            .credentials
            .decrypt(&device.credential_ref)
            .context("password decryption failed")?;

        let session = self
            .client
            .connect(&device.endpoint(), &credentials, self.client.request_timeout())
            .await
            .context("failed to open controller session")?;

        let mut summary = LogCollectionSummary {
            device_id: device.id.clone(),
            ..LogCollectionSummary::default()
        };
        let mut last_error = None;

        for source in LogSource::ALL {
            let query = self.query_for(&device.id, source, force_refresh).await;

            match session.fetch_logs(&query).await {
                Ok(entries) => {
                    let stored = self
                        .store
                        .record_log_entries(&device.id, source, &entries)
                        .await
                        .with_context(|| format!("failed to store {source} entries"))?;
                    summary.add(summarize(source, &entries, stored));
                }
                Err(e) => {
                    warn!("failed to read {source}: {e}");
                    last_error = Some(e);
                }
            }
        }

        session.close().await;

        if summary.sources.is_empty()
            && let Some(e) = last_error
        {
            return Err(e).context("no event log could be read");
        }

        info!(
            "collected {} log entries ({} critical, {} warning)",
            summary.total, summary.critical, summary.warning
        );
        Ok(summary)
    }

    async fn query_for(&self, device_id: &str, source: LogSource, force_refresh: bool) -> LogQuery {
        let mut query = LogQuery {
            kind: source.into(),
            max_entries: self.max_entries,
            ..LogQuery::default()
        };
        if force_refresh {
            return query;
        }

        match self.store.log_watermark(device_id, source).await {
            Ok(Some(watermark)) => {
                debug!("{source} watermark at {:?}", watermark.last_entry_id);
                query.since_entry_id = watermark.last_entry_id;
                query.since_timestamp = watermark.last_timestamp;
            }
            Ok(None) => {}
            Err(e) => warn!("failed to read {source} watermark, reading from the start: {e}"),
        }
        query
    }
}

fn summarize(source: LogSource, entries: &[LogEntry], stored: usize) -> SourceSummary {
    let critical = entries
        .iter()
        .filter(|e| e.severity == LogSeverity::Critical)
        .count();

    SourceSummary {
        source,
        total: entries.len(),
        critical,
        warning: entries.len() - critical,
        stored,
    }
}

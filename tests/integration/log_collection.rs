//! Incremental event log collection
//!
//! These tests verify that:
//! - Only Warning/Critical entries are collected
//! - The watermark limits later runs to new entries
//! - A forced refresh reads everything again without storing duplicates

use std::sync::Arc;

use redfish_monitoring::log_collector::LogCollector;
use redfish_monitoring::redfish::LogSource;
use redfish_monitoring::storage::{AlertStore, MemoryBackend};

use crate::helpers::{CountingCredentialStore, MockBmc, device, plain_http_client};

const SEL: &[(&str, &str, &str, &str)] = &[
    ("1", "Warning", "2024-05-01T10:00:00Z", "Fan 3 redundancy degraded"),
    ("2", "OK", "2024-05-01T10:05:00Z", "Fan 3 redundancy restored"),
    ("3", "Critical", "2024-05-01T11:00:00Z", "Uncorrectable ECC error on DIMM A1"),
];

async fn bmc_with_logs(entries: &[(&str, &str, &str, &str)]) -> MockBmc {
    let bmc = MockBmc::healthy().await;
    bmc.mount_logs(entries).await;
    bmc
}

fn collector(store: Arc<MemoryBackend>) -> LogCollector {
    LogCollector::new(
        plain_http_client(),
        Arc::new(CountingCredentialStore::default()),
        store,
        100,
    )
}

#[tokio::test]
async fn test_first_run_collects_degraded_entries() {
    let bmc = bmc_with_logs(SEL).await;
    let store = Arc::new(MemoryBackend::new());

    let summary = collector(store.clone())
        .collect(&device("srv-1", "10.0.0.1", bmc.port()), false)
        .await
        .unwrap();

    assert_eq!(summary.device_id, "srv-1");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.critical, 1);
    assert_eq!(summary.warning, 1);

    let sel = summary
        .sources
        .iter()
        .find(|s| s.source == LogSource::Sel)
        .unwrap();
    assert_eq!(sel.stored, 2);

    let watermark = store
        .log_watermark("srv-1", LogSource::Sel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(watermark.last_entry_id.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_watermark_limits_second_run() {
    let bmc = bmc_with_logs(SEL).await;
    let store = Arc::new(MemoryBackend::new());
    let collector = collector(store.clone());
    let device = device("srv-1", "10.0.0.1", bmc.port());

    collector.collect(&device, false).await.unwrap();
    let unchanged = collector.collect(&device, false).await.unwrap();
    assert_eq!(unchanged.total, 0);

    // One more entry appears on the controller
    let mut grown = SEL.to_vec();
    grown.push(("4", "Critical", "2024-05-02T08:00:00Z", "PSU2 input lost"));
    bmc.server.reset().await;
    bmc.mount_login().await;
    bmc.mount_inventory(&[("PSU1", "OK")]).await;
    bmc.mount_logs(&grown).await;

    let next = collector.collect(&device, false).await.unwrap();
    assert_eq!(next.total, 1);
    assert_eq!(next.critical, 1);
}

#[tokio::test]
async fn test_forced_refresh_rereads_without_duplicates() {
    let bmc = bmc_with_logs(SEL).await;
    let store = Arc::new(MemoryBackend::new());
    let collector = collector(store.clone());
    let device = device("srv-1", "10.0.0.1", bmc.port());

    collector.collect(&device, false).await.unwrap();
    let forced = collector.collect(&device, true).await.unwrap();

    assert_eq!(forced.total, 2);
    assert!(forced.sources.iter().all(|s| s.stored == 0));
}

#[tokio::test]
async fn test_missing_credentials_fail_collection() {
    let bmc = bmc_with_logs(SEL).await;
    let store = Arc::new(MemoryBackend::new());

    let mut device = device("srv-1", "10.0.0.1", bmc.port());
    device.credential_ref = "missing".to_string();

    let err = collector(store).collect(&device, false).await.unwrap_err();
    assert!(format!("{err:#}").contains("password decryption failed"));
    assert_eq!(bmc.request_count().await, 0);
}

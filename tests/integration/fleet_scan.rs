//! End-to-end fleet scans against mock management controllers
//!
//! These tests verify that:
//! - One failing device never stops the others
//! - An unreachable controller skips credentials and Redfish entirely
//! - Rejected logins keep the connectivity result
//! - Transport failures are retried and leave alerts untouched
//! - A stalled log service does not hold up the rest of the fleet

use std::sync::Arc;
use std::time::{Duration, Instant};

use redfish_monitoring::actors::{FleetPipeline, FleetScheduler, NotifierHandle, RetryPolicy, ScanPolicy, run_fleet_scan};
use redfish_monitoring::alerts::AlertReconciler;
use redfish_monitoring::devices::{DeviceRegistry, InMemoryDeviceRegistry, ScanState};
use redfish_monitoring::log_collector::LogCollector;
use redfish_monitoring::realtime::{LocalBus, RealtimeNotifier};
use redfish_monitoring::storage::{AlertStore, MemoryBackend};
use redfish_monitoring::{ComponentType, Device, HardwareOutcome, HealthStatus, ScanError};

use crate::helpers::{CountingCredentialStore, MockBmc, StaticProbe, analyzer, device, plain_http_client};

struct Fleet {
    pipeline: FleetPipeline,
    registry: Arc<InMemoryDeviceRegistry>,
    store: Arc<MemoryBackend>,
}

fn fleet(
    devices: Vec<Device>,
    probe: Arc<StaticProbe>,
    credentials: Arc<CountingCredentialStore>,
    retry: RetryPolicy,
) -> Fleet {
    let store = Arc::new(MemoryBackend::new());
    let registry = Arc::new(InMemoryDeviceRegistry::new(devices));
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));

    let scheduler = FleetScheduler::new(
        Arc::new(analyzer(probe, credentials)),
        ScanPolicy {
            concurrency: 4,
            per_device_timeout: Duration::from_secs(20),
            retry,
        },
    );

    Fleet {
        pipeline: FleetPipeline {
            registry: registry.clone(),
            scheduler: Arc::new(scheduler),
            reconciler: AlertReconciler::new(store.clone()),
            notifier: NotifierHandle::spawn(notifier),
            log_collector: None,
        },
        registry,
        store,
    }
}

#[tokio::test]
async fn test_mixed_fleet_yields_one_connectivity_alert() {
    let rejecting = MockBmc::rejecting_login().await;
    let healthy = MockBmc::healthy().await;

    let mut oob_down = device("srv-oob-down", "10.0.0.1", 443);
    oob_down.oob_ip = "10.255.0.1".parse().unwrap();
    let devices = vec![
        oob_down,
        device("srv-auth", "10.0.0.2", rejecting.port()),
        device("srv-ok", "10.0.0.3", healthy.port()),
    ];

    let probe = Arc::new(StaticProbe::with_offline(&["10.255.0.1"]));
    let credentials = Arc::new(CountingCredentialStore::default());
    let fleet = fleet(devices, probe, credentials.clone(), RetryPolicy::none());

    let summary = run_fleet_scan(&fleet.pipeline, false).await;

    assert_eq!(summary.device_count, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);

    let alerts = fleet.store.active_alerts(None).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].device_id, "srv-oob-down");
    assert_eq!(alerts[0].component_type, ComponentType::OobConnectivity);
    assert_eq!(alerts[0].health_status, HealthStatus::Critical);

    // The unreachable controller never gets a credential lookup
    assert_eq!(credentials.count(), 2);

    let statuses = fleet.registry.statuses().await;
    let ok = statuses.iter().find(|(d, _)| d.id == "srv-ok").unwrap();
    assert_eq!(ok.1.overall_health, HealthStatus::Ok);
    assert_eq!(ok.1.scan_state, ScanState::Ok);
}

#[tokio::test]
async fn test_unreachable_controller_is_never_contacted() {
    let bmc = MockBmc::healthy().await;
    let probe = Arc::new(StaticProbe::with_offline(&["127.0.0.1"]));
    let credentials = Arc::new(CountingCredentialStore::default());

    let analyzer = analyzer(probe.clone(), credentials.clone());
    let result = analyzer
        .scan_device(&device("srv-1", "10.0.0.1", bmc.port()))
        .await;

    assert!(result.success);
    assert_eq!(result.hardware, HardwareOutcome::Skipped);
    assert_eq!(result.alerts.len(), 1);
    assert_eq!(bmc.request_count().await, 0);
    assert_eq!(credentials.count(), 0);
    // business and management address both probed
    assert_eq!(probe.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rejected_login_keeps_connectivity_result() {
    let bmc = MockBmc::rejecting_login().await;
    let probe = Arc::new(StaticProbe::default());
    let credentials = Arc::new(CountingCredentialStore::default());

    let result = analyzer(probe, credentials)
        .scan_device(&device("srv-1", "10.0.0.1", bmc.port()))
        .await;

    assert!(result.success);
    assert!(matches!(
        result.hardware,
        HardwareOutcome::Failed(ScanError::AuthenticationFailed(_))
    ));
    assert!(result.alerts.is_empty());
    assert_eq!(result.components.len(), 2);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_missing_credentials_skip_redfish() {
    let bmc = MockBmc::healthy().await;
    let probe = Arc::new(StaticProbe::default());
    let credentials = Arc::new(CountingCredentialStore::default());

    let mut device = device("srv-1", "10.0.0.1", bmc.port());
    device.credential_ref = "missing".to_string();

    let result = analyzer(probe, credentials).scan_device(&device).await;

    assert!(result.success);
    assert!(matches!(
        result.hardware,
        HardwareOutcome::Failed(ScanError::CredentialDecryptionFailed(_))
    ));
    assert_eq!(bmc.request_count().await, 0);
}

#[tokio::test]
async fn test_refused_controller_is_retried_and_changes_nothing() {
    // A port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let probe = Arc::new(StaticProbe::default());
    let credentials = Arc::new(CountingCredentialStore::default());
    let retry = RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        multiplier: 2.0,
    };
    let fleet = fleet(
        vec![device("srv-refused", "10.0.0.1", port)],
        probe,
        credentials.clone(),
        retry,
    );

    let summary = run_fleet_scan(&fleet.pipeline, false).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_devices, vec!["srv-refused".to_string()]);
    assert_eq!(summary.alert_changes, 0);
    assert_eq!(credentials.count(), 3);
    assert!(fleet.store.active_alerts(None).await.unwrap().is_empty());

    let statuses = fleet.registry.statuses().await;
    assert_eq!(statuses[0].1.scan_state, ScanState::Error);
    assert!(statuses[0].1.last_error.is_some());
}

#[tokio::test]
async fn test_degraded_power_supply_raises_alert() {
    let bmc = MockBmc::with_power_supplies(&[("PSU1", "OK"), ("PSU2", "Critical")]).await;
    let probe = Arc::new(StaticProbe::default());
    let credentials = Arc::new(CountingCredentialStore::default());
    let fleet = fleet(
        vec![device("srv-psu", "10.0.0.1", bmc.port())],
        probe,
        credentials,
        RetryPolicy::none(),
    );

    let summary = run_fleet_scan(&fleet.pipeline, false).await;
    assert_eq!(summary.alert_changes, 1);

    let alerts = fleet.store.active_alerts(Some("srv-psu")).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].component_type, ComponentType::Power);
    assert_eq!(alerts[0].component_name, "PSU2");
    assert!(alerts[0].message.contains("PSU2"));

    let statuses = fleet.registry.statuses().await;
    assert_eq!(statuses[0].1.overall_health, HealthStatus::Critical);
}

#[tokio::test]
async fn test_stalled_log_service_does_not_hold_up_the_fleet() {
    let stalled = MockBmc::healthy().await;
    stalled.mount_stalled_logs(Duration::from_secs(30)).await;
    let degraded = MockBmc::with_power_supplies(&[("PSU1", "Critical")]).await;

    let probe = Arc::new(StaticProbe::default());
    let credentials = Arc::new(CountingCredentialStore::default());
    let mut fleet = fleet(
        vec![
            device("srv-stalled", "10.0.0.1", stalled.port()),
            device("srv-psu", "10.0.0.2", degraded.port()),
        ],
        probe.clone(),
        credentials.clone(),
        RetryPolicy::none(),
    );
    fleet.pipeline.scheduler = Arc::new(FleetScheduler::new(
        Arc::new(analyzer(probe, credentials.clone())),
        ScanPolicy {
            concurrency: 2,
            per_device_timeout: Duration::from_secs(1),
            retry: RetryPolicy::none(),
        },
    ));
    fleet.pipeline.log_collector = Some(Arc::new(LogCollector::new(
        plain_http_client(),
        credentials,
        fleet.store.clone(),
        100,
    )));

    let started = Instant::now();
    let summary = run_fleet_scan(&fleet.pipeline, false).await;

    // bounded by the per-device timeout, not the controller's request timeout
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.alert_changes, 1);
    assert_eq!(fleet.store.active_alerts(Some("srv-psu")).await.unwrap().len(), 1);

    let statuses = fleet.registry.statuses().await;
    assert!(statuses.iter().all(|(_, status)| status.scan_state == ScanState::Ok));
}

//! Alert lifecycle across consecutive scans
//!
//! These tests verify that:
//! - A repeated fault updates one alert instead of opening new ones
//! - A healthy read resolves the alert
//! - Business urgency rules override the provisional urgency
//! - Subscribers of the urgent room see the alert as it is raised

use std::sync::Arc;
use std::time::Duration;

use redfish_monitoring::actors::{FleetPipeline, FleetScheduler, NotifierHandle, RetryPolicy, ScanPolicy, run_fleet_scan};
use redfish_monitoring::alerts::AlertReconciler;
use redfish_monitoring::devices::InMemoryDeviceRegistry;
use redfish_monitoring::realtime::events::ROOM_URGENT_ALERTS;
use redfish_monitoring::realtime::{LocalBus, OutboundFrame, RealtimeNotifier};
use redfish_monitoring::storage::{AlertStore, MemoryBackend, UrgencyRule};
use redfish_monitoring::{Device, UrgencyLevel};
use serde_json::Value;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::{CountingCredentialStore, MockBmc, StaticProbe, analyzer, device};

fn pipeline(
    device: Device,
    store: Arc<MemoryBackend>,
    notifier: Arc<RealtimeNotifier>,
    per_device_timeout: Duration,
) -> FleetPipeline {
    let scheduler = FleetScheduler::new(
        Arc::new(analyzer(
            Arc::new(StaticProbe::default()),
            Arc::new(CountingCredentialStore::default()),
        )),
        ScanPolicy {
            concurrency: 1,
            per_device_timeout,
            retry: RetryPolicy::none(),
        },
    );

    FleetPipeline {
        registry: Arc::new(InMemoryDeviceRegistry::new(vec![device])),
        scheduler: Arc::new(scheduler),
        reconciler: AlertReconciler::new(store),
        notifier: NotifierHandle::spawn(notifier),
        log_collector: None,
    }
}

/// Next text frame of a given event type, skipping everything else.
async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<OutboundFrame>, kind: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(OutboundFrame::Text(text)) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(_) => {}
                None => panic!("subscriber channel closed"),
            }
        }
    })
    .await
    .expect("event not delivered in time")
}

#[tokio::test]
async fn test_fault_is_updated_then_resolved() {
    let bmc = MockBmc::with_power_supplies(&[("PSU1", "Warning"), ("PSU2", "OK")]).await;
    let store = Arc::new(MemoryBackend::new());
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let pipeline = pipeline(
        device("srv-1", "10.0.0.1", bmc.port()),
        store.clone(),
        notifier,
        Duration::from_secs(20),
    );

    // Same fault twice: one alert, counted twice
    run_fleet_scan(&pipeline, false).await;
    let second = run_fleet_scan(&pipeline, false).await;
    assert_eq!(second.alert_changes, 0);

    let alerts = store.active_alerts(Some("srv-1")).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].occurrence_count, 2);
    assert_eq!(alerts[0].urgency_level, UrgencyLevel::Scheduled);
    let first_occurrence = alerts[0].first_occurrence;

    // Escalation updates the same row
    bmc.server.reset().await;
    bmc.mount_login().await;
    bmc.mount_inventory(&[("PSU1", "Critical"), ("PSU2", "OK")]).await;
    let escalated = run_fleet_scan(&pipeline, false).await;
    assert_eq!(escalated.alert_changes, 1);

    let alerts = store.active_alerts(Some("srv-1")).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].urgency_level, UrgencyLevel::Urgent);
    assert_eq!(alerts[0].first_occurrence, first_occurrence);

    // Healthy again
    bmc.server.reset().await;
    bmc.mount_login().await;
    bmc.mount_inventory(&[("PSU1", "OK"), ("PSU2", "OK")]).await;
    let recovered = run_fleet_scan(&pipeline, false).await;
    assert_eq!(recovered.alert_changes, 1);
    assert!(store.active_alerts(Some("srv-1")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_scan_keeps_alerts_open() {
    let bmc = MockBmc::with_power_supplies(&[("PSU1", "Critical")]).await;
    let store = Arc::new(MemoryBackend::new());
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let pipeline = pipeline(
        device("srv-1", "10.0.0.1", bmc.port()),
        store.clone(),
        notifier,
        Duration::from_secs(1),
    );

    run_fleet_scan(&pipeline, false).await;
    assert_eq!(store.active_alerts(None).await.unwrap().len(), 1);

    // Controller stops answering: the scan times out, nothing is resolved
    bmc.server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(3)))
        .mount(&bmc.server)
        .await;

    let summary = run_fleet_scan(&pipeline, false).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.alert_changes, 0);
    assert_eq!(store.active_alerts(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_business_rule_overrides_urgency() {
    let bmc = MockBmc::with_power_supplies(&[("PSU1", "Warning")]).await;
    let store = Arc::new(MemoryBackend::new());
    store
        .put_urgency_rule(UrgencyRule {
            business_type: "trading".to_string(),
            hardware_type: "power".to_string(),
            urgency_level: UrgencyLevel::Urgent,
        })
        .await
        .unwrap();

    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let mut rx = notifier.connect("ops").await;
    notifier.join_room("ops", ROOM_URGENT_ALERTS).await.unwrap();

    let mut trading = device("srv-trading", "10.0.0.1", bmc.port());
    trading.business_type = Some("trading".to_string());
    let pipeline = pipeline(trading, store.clone(), notifier, Duration::from_secs(20));

    run_fleet_scan(&pipeline, false).await;

    let alerts = store.active_alerts(None).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].urgency_level, UrgencyLevel::Urgent);

    let event = next_event(&mut rx, "alert_update").await;
    assert_eq!(event["deviceId"], "srv-trading");
    assert_eq!(event["urgencyLevel"], "urgent");
    assert_eq!(event["change"], "raised");
}

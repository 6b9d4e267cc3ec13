//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - All REST endpoints return correct responses
//! - Manual scans are accepted once and then throttled
//! - Unknown devices are rejected
//! - WebSocket streaming answers the client protocol

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt, Stream, StreamExt};
use redfish_monitoring::actors::{
    CoordinatorHandle, CoordinatorSettings, FleetPipeline, FleetScheduler, NotifierHandle, RetryPolicy,
    ScanPolicy,
};
use redfish_monitoring::alerts::AlertReconciler;
use redfish_monitoring::api::{ApiConfig, ApiState, spawn_api_server};
use redfish_monitoring::devices::InMemoryDeviceRegistry;
use redfish_monitoring::log_collector::LogCollector;
use redfish_monitoring::realtime::{LocalBus, RealtimeNotifier};
use redfish_monitoring::storage::MemoryBackend;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::helpers::{CountingCredentialStore, MockBmc, StaticProbe, analyzer, device, plain_http_client};

// Helper to create test API server
async fn spawn_test_api(bmc: &MockBmc) -> SocketAddr {
    let store = Arc::new(MemoryBackend::new());
    let registry = Arc::new(InMemoryDeviceRegistry::new(vec![device(
        "srv-1",
        "10.0.0.1",
        bmc.port(),
    )]));
    let credentials = Arc::new(CountingCredentialStore::default());
    let analyzer = Arc::new(analyzer(Arc::new(StaticProbe::default()), credentials.clone()));
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let notifications = NotifierHandle::spawn(notifier.clone());

    let scheduler = FleetScheduler::new(
        analyzer.clone(),
        ScanPolicy {
            concurrency: 2,
            per_device_timeout: Duration::from_secs(20),
            retry: RetryPolicy::none(),
        },
    );
    let coordinator = CoordinatorHandle::spawn(
        FleetPipeline {
            registry: registry.clone(),
            scheduler: Arc::new(scheduler),
            reconciler: AlertReconciler::new(store.clone()),
            notifier: notifications.clone(),
            log_collector: None,
        },
        CoordinatorSettings {
            scan_interval: None,
            min_trigger_interval: Duration::from_secs(60),
            resolved_retention_days: 30,
        },
    );

    let state = ApiState {
        registry,
        store: store.clone(),
        coordinator,
        analyzer,
        log_collector: Arc::new(LogCollector::new(plain_http_client(), credentials, store, 100)),
        notifier,
        notifications,
    };

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    spawn_api_server(config, state).await.unwrap()
}

/// Next text frame as JSON, skipping control frames.
async fn next_json<S>(socket: &mut S) -> Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no message in time")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_for_scan(client: &reqwest::Client, addr: SocketAddr) -> Value {
    for _ in 0..100 {
        let body: Value = client
            .get(format!("http://{addr}/api/v1/scan"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !body["lastScan"].is_null() {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("scan did not finish in time");
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let bmc = MockBmc::healthy().await;
    let addr = spawn_test_api(&bmc).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/api/v1/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"]["healthy"], true);
    assert_eq!(body["subscribers"], 0);
}

#[tokio::test]
async fn test_list_devices_before_first_scan_is_pending() {
    let bmc = MockBmc::healthy().await;
    let addr = spawn_test_api(&bmc).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("http://{addr}/api/v1/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["count"], 1);
    let device = &body["devices"][0];
    assert_eq!(device["id"], "srv-1");
    assert_eq!(device["status"]["scanState"], "pending");
    assert_eq!(device["status"]["overallHealth"], "Unknown");
    assert_eq!(device["activeAlerts"], 0);
    // credential references never leave the hub
    assert!(device.get("credentialRef").is_none());
}

#[tokio::test]
async fn test_scan_trigger_is_throttled_and_raises_alerts() {
    let bmc = MockBmc::with_power_supplies(&[("PSU1", "Critical")]).await;
    let addr = spawn_test_api(&bmc).await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("http://{addr}/api/v1/scan"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let status = wait_for_scan(&client, addr).await;
    assert_eq!(status["lastScan"]["deviceCount"], 1);
    assert_eq!(status["lastScan"]["succeeded"], 1);

    // Within the minimum interval a plain trigger is rejected
    let second = client
        .post(format!("http://{addr}/api/v1/scan"))
        .json(&json!({"force": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["accepted"], false);
    assert!(body["reason"].is_string());

    // A forced trigger skips the interval
    let forced = client
        .post(format!("http://{addr}/api/v1/scan"))
        .json(&json!({"force": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(forced.status(), StatusCode::ACCEPTED);

    let alerts: Value = client
        .get(format!("http://{addr}/api/v1/alerts?device_id=srv-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["count"], 1);
    assert_eq!(alerts["alerts"][0]["componentName"], "PSU1");
    assert_eq!(alerts["alerts"][0]["urgencyLevel"], "urgent");

    let other: Value = client
        .get(format!("http://{addr}/api/v1/alerts?device_id=srv-2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(other["count"], 0);
}

#[tokio::test]
async fn test_connection_test_reports_system_info() {
    let bmc = MockBmc::healthy().await;
    let addr = spawn_test_api(&bmc).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/api/v1/devices/srv-1/test"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["systemInfo"].is_object());

    // A connection test never touches alerts
    let alerts: Value = client
        .get(format!("http://{addr}/api/v1/alerts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["count"], 0);
}

#[tokio::test]
async fn test_unknown_device_is_not_found() {
    let bmc = MockBmc::healthy().await;
    let addr = spawn_test_api(&bmc).await;

    let client = reqwest::Client::new();
    for endpoint in ["test", "logs"] {
        let response = client
            .post(format!("http://{addr}/api/v1/devices/nope/{endpoint}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }
}

#[tokio::test]
async fn test_log_collection_endpoint() {
    let bmc = MockBmc::healthy().await;
    bmc.mount_logs(&[("12", "Critical", "2024-05-01T11:00:00Z", "Power supply 2 failure")])
        .await;
    let addr = spawn_test_api(&bmc).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/api/v1/devices/srv-1/logs"))
        .json(&json!({"force_refresh": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["deviceId"], "srv-1");
    assert_eq!(body["total"], 1);
    assert_eq!(body["critical"], 1);
}

#[tokio::test]
async fn test_websocket_stream_protocol() {
    let bmc = MockBmc::healthy().await;
    let addr = spawn_test_api(&bmc).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();

    let greeting = next_json(&mut socket).await;
    assert_eq!(greeting["type"], "connection");
    assert_eq!(greeting["status"], "connected");

    let joined = next_json(&mut socket).await;
    assert_eq!(joined["type"], "room");
    assert_eq!(joined["action"], "joined");
    assert_eq!(joined["room"], "dashboard");

    socket
        .send(Message::Text(json!({"action": "ping"}).to_string()))
        .await
        .unwrap();
    socket
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    socket
        .send(Message::Text(json!({"action": "join", "room": "alerts"}).to_string()))
        .await
        .unwrap();

    let mut replies = Vec::new();
    for _ in 0..3 {
        replies.push(next_json(&mut socket).await);
    }

    assert_eq!(replies[0]["type"], "pong");
    assert_eq!(replies[1]["type"], "error");
    assert_eq!(replies[2]["type"], "room");
    assert_eq!(replies[2]["room"], "alerts");

    socket.close(None).await.unwrap();
}

//! Realtime fan-out across rooms and hub instances
//!
//! These tests verify that:
//! - Subscribers in several matching rooms get an event once
//! - Device rooms only see their own device
//! - System notifications reach every subscriber
//! - Events published on one instance reach subscribers of another, once

use std::sync::Arc;
use std::time::Duration;

use redfish_monitoring::HealthStatus;
use redfish_monitoring::actors::NotifierHandle;
use redfish_monitoring::devices::{DeviceStatus, ScanState};
use redfish_monitoring::realtime::events::{ROOM_DASHBOARD, ROOM_DEVICE_MONITORING, device_room};
use redfish_monitoring::realtime::{
    EventBus, LocalBus, NotificationLevel, OutboundFrame, RealtimeEvent, RealtimeNotifier,
};
use serde_json::Value;
use tokio::sync::mpsc::Receiver;

fn critical_status() -> DeviceStatus {
    DeviceStatus {
        overall_health: HealthStatus::Critical,
        scan_state: ScanState::Ok,
        ..DeviceStatus::default()
    }
}

/// Event frames received within `wait`, protocol replies filtered out.
async fn drain_events(rx: &mut Receiver<OutboundFrame>, wait: Duration) -> Vec<Value> {
    tokio::time::sleep(wait).await;

    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let OutboundFrame::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            if !matches!(value["type"].as_str(), Some("connection" | "room")) {
                events.push(value);
            }
        }
    }
    events
}

#[tokio::test]
async fn test_subscriber_in_several_rooms_gets_event_once() {
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let mut rx = notifier.connect("dash").await;
    notifier.join_room("dash", ROOM_DASHBOARD).await.unwrap();
    notifier.join_room("dash", ROOM_DEVICE_MONITORING).await.unwrap();
    notifier.join_room("dash", &device_room("srv-1")).await.unwrap();

    let handle = NotifierHandle::spawn(notifier.clone());
    handle
        .publish(RealtimeEvent::device_status_update("srv-1", &critical_status()))
        .await
        .unwrap();

    let events = drain_events(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "device_status_update");
    assert_eq!(events[0]["deviceId"], "srv-1");
    assert_eq!(events[0]["healthStatus"], "Critical");

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.events, 1);
    assert_eq!(stats.delivered, 1);
}

#[tokio::test]
async fn test_device_room_only_sees_its_device() {
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let mut rx = notifier.connect("watcher").await;
    notifier.join_room("watcher", &device_room("srv-2")).await.unwrap();

    let handle = NotifierHandle::spawn(notifier.clone());
    for id in ["srv-1", "srv-2", "srv-3"] {
        handle
            .publish(RealtimeEvent::device_status_update(id, &critical_status()))
            .await
            .unwrap();
    }

    let events = drain_events(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["deviceId"], "srv-2");
}

#[tokio::test]
async fn test_system_notification_reaches_everyone() {
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let mut in_room = notifier.connect("a").await;
    notifier.join_room("a", ROOM_DASHBOARD).await.unwrap();
    let mut no_room = notifier.connect("b").await;

    let handle = NotifierHandle::spawn(notifier.clone());
    handle
        .publish(RealtimeEvent::system(NotificationLevel::Warning, "maintenance at 22:00"))
        .await
        .unwrap();

    for rx in [&mut in_room, &mut no_room] {
        let events = drain_events(rx, Duration::from_millis(50)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "system_notification");
        assert_eq!(events[0]["level"], "warning");
    }
}

#[tokio::test]
async fn test_events_cross_instances() {
    let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());
    let first = Arc::new(RealtimeNotifier::new(bus.clone()));
    let second = Arc::new(RealtimeNotifier::new(bus.clone()));
    let first_listener = first.spawn_bus_listener();
    let second_listener = second.spawn_bus_listener();

    let mut local = first.connect("local").await;
    first.join_room("local", ROOM_DEVICE_MONITORING).await.unwrap();
    let mut remote = second.connect("remote").await;
    second.join_room("remote", ROOM_DEVICE_MONITORING).await.unwrap();
    second.join_room("remote", ROOM_DASHBOARD).await.unwrap();
    second.join_room("remote", &device_room("srv-9")).await.unwrap();

    // Listeners have to be subscribed before anything is published
    tokio::time::sleep(Duration::from_millis(20)).await;

    let handle = NotifierHandle::spawn(first.clone());
    handle
        .publish(RealtimeEvent::device_status_update("srv-9", &critical_status()))
        .await
        .unwrap();

    let local_events = drain_events(&mut local, Duration::from_millis(100)).await;
    assert_eq!(local_events.len(), 1, "own envelopes must not come back");

    // three matching rooms on the remote side, still one copy
    let remote_events = drain_events(&mut remote, Duration::from_millis(50)).await;
    assert_eq!(remote_events.len(), 1);
    assert_eq!(remote_events[0]["deviceId"], "srv-9");

    first_listener.abort();
    second_listener.abort();
}

#[tokio::test]
async fn test_gone_subscriber_is_dropped_on_delivery() {
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let rx = notifier.connect("gone").await;
    notifier.join_room("gone", ROOM_DASHBOARD).await.unwrap();
    let mut alive = notifier.connect("alive").await;
    notifier.join_room("alive", ROOM_DASHBOARD).await.unwrap();
    drop(rx);

    let event = RealtimeEvent::device_status_update("srv-1", &critical_status());
    let delivered = notifier.broadcast_to_room(ROOM_DASHBOARD, &event).await.unwrap();

    assert_eq!(delivered, 1);
    assert_eq!(notifier.subscriber_count().await, 1);
    assert_eq!(notifier.room_members(ROOM_DASHBOARD).await, vec!["alive".to_string()]);
    assert_eq!(drain_events(&mut alive, Duration::ZERO).await.len(), 1);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let notifier = Arc::new(RealtimeNotifier::new(Arc::new(LocalBus::new())));
    let mut old = notifier.connect("dash").await;
    notifier.join_room("dash", ROOM_DASHBOARD).await.unwrap();

    let _new = notifier.connect("dash").await;

    let frames: Vec<OutboundFrame> = std::iter::from_fn(|| old.try_recv().ok()).collect();
    assert_eq!(frames.last(), Some(&OutboundFrame::Close));
    assert_eq!(notifier.subscriber_count().await, 1);
    // rooms start empty after a reconnect
    assert_eq!(notifier.room_count().await, 0);
}

//! Subscriber registry and room fan-out
//!
//! Each subscriber owns a bounded outbound channel; the transport (the
//! WebSocket handler) drains it into the socket. A subscriber whose transport
//! is gone, or who has fallen `SUBSCRIBER_BUFFER` frames behind, is
//! disconnected after the broadcast that noticed it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use super::NotifyError;
use super::bus::{BROADCAST_CHANNEL, BusEnvelope, EventBus, channel_room, room_channel};
use super::events::RealtimeEvent;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const BUS_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Frames a subscriber may have queued before it counts as stalled.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Frame queued for one subscriber's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close,
}

struct Subscriber {
    sender: mpsc::Sender<OutboundFrame>,
    rooms: HashSet<String>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<String, Subscriber>,
    rooms: HashMap<String, HashSet<String>>,
}

impl Registry {
    fn remove(&mut self, subscriber_id: &str) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(subscriber_id)?;
        for room in &subscriber.rooms {
            self.leave(subscriber_id, room);
        }
        Some(subscriber)
    }

    fn leave(&mut self, subscriber_id: &str, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(subscriber_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Connected subscribers, their rooms, and the cross-process bus.
///
/// Room membership changes only through the subscriber's own `connect`,
/// `join_room`, `leave_room` and `disconnect` calls.
pub struct RealtimeNotifier {
    instance_id: String,
    registry: RwLock<Registry>,
    bus: Arc<dyn EventBus>,
}

impl RealtimeNotifier {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            registry: RwLock::new(Registry::default()),
            bus,
        }
    }

    /// Identifies this process on the bus.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Registers a subscriber and greets it. A subscriber reconnecting under
    /// the same id replaces its previous connection.
    ///
    /// Returns the receiving half of the subscriber's outbound channel.
    pub async fn connect(&self, subscriber_id: &str) -> mpsc::Receiver<OutboundFrame> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);

        let greeting = json!({
            "type": "connection",
            "status": "connected",
            "subscriber_id": subscriber_id,
            "timestamp": Utc::now(),
        });
        let _ = sender.try_send(OutboundFrame::Text(greeting.to_string()));

        let mut registry = self.registry.write().await;
        if let Some(previous) = registry.remove(subscriber_id) {
            let _ = previous.sender.try_send(OutboundFrame::Close);
        }
        registry.subscribers.insert(
            subscriber_id.to_string(),
            Subscriber {
                sender,
                rooms: HashSet::new(),
                connected_at: Utc::now(),
            },
        );

        info!("subscriber {subscriber_id} connected");
        receiver
    }

    /// Removes a subscriber from every room. Returns whether it was connected.
    pub async fn disconnect(&self, subscriber_id: &str) -> bool {
        let removed = self.registry.write().await.remove(subscriber_id);
        match removed {
            Some(subscriber) => {
                let connected_for = Utc::now() - subscriber.connected_at;
                info!(
                    "subscriber {subscriber_id} disconnected after {}s",
                    connected_for.num_seconds()
                );
                true
            }
            None => false,
        }
    }

    pub async fn join_room(&self, subscriber_id: &str, room: &str) -> Result<(), NotifyError> {
        {
            let mut registry = self.registry.write().await;
            let subscriber = registry
                .subscribers
                .get_mut(subscriber_id)
                .ok_or_else(|| NotifyError::UnknownSubscriber(subscriber_id.to_string()))?;
            subscriber.rooms.insert(room.to_string());
            registry
                .rooms
                .entry(room.to_string())
                .or_default()
                .insert(subscriber_id.to_string());
        }

        debug!("subscriber {subscriber_id} joined {room}");
        self.reply(
            subscriber_id,
            json!({ "type": "room", "action": "joined", "room": room }),
        )
        .await
    }

    pub async fn leave_room(&self, subscriber_id: &str, room: &str) -> Result<(), NotifyError> {
        {
            let mut registry = self.registry.write().await;
            let subscriber = registry
                .subscribers
                .get_mut(subscriber_id)
                .ok_or_else(|| NotifyError::UnknownSubscriber(subscriber_id.to_string()))?;
            subscriber.rooms.remove(room);
            registry.leave(subscriber_id, room);
        }

        debug!("subscriber {subscriber_id} left {room}");
        self.reply(
            subscriber_id,
            json!({ "type": "room", "action": "left", "room": room }),
        )
        .await
    }

    /// Sends a protocol message (greeting, pong, error) to one subscriber.
    pub async fn reply(&self, subscriber_id: &str, message: serde_json::Value) -> Result<(), NotifyError> {
        self.send_text(subscriber_id, message.to_string()).await
    }

    pub async fn send_to(&self, subscriber_id: &str, event: &RealtimeEvent) -> Result<(), NotifyError> {
        let text = serde_json::to_string(event)?;
        self.send_text(subscriber_id, text).await
    }

    async fn send_text(&self, subscriber_id: &str, text: String) -> Result<(), NotifyError> {
        let sent = {
            let registry = self.registry.read().await;
            let subscriber = registry
                .subscribers
                .get(subscriber_id)
                .ok_or_else(|| NotifyError::UnknownSubscriber(subscriber_id.to_string()))?;
            subscriber.sender.try_send(OutboundFrame::Text(text))
        };

        match sent {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, TrySendError::Full(_)) {
                    warn!("subscriber {subscriber_id} is {SUBSCRIBER_BUFFER} frames behind, disconnecting");
                }
                self.disconnect(subscriber_id).await;
                Err(NotifyError::SubscriberGone(subscriber_id.to_string()))
            }
        }
    }

    /// Delivers an event to every member of `room`. Returns how many
    /// subscribers received it.
    pub async fn broadcast_to_room(&self, room: &str, event: &RealtimeEvent) -> Result<usize, NotifyError> {
        let text = serde_json::to_string(event)?;
        Ok(self.deliver(Target::Rooms(&[room]), &text).await)
    }

    /// Delivers an event once to every subscriber in any of `rooms`.
    pub async fn broadcast_to_rooms(&self, rooms: &[&str], event: &RealtimeEvent) -> Result<usize, NotifyError> {
        let text = serde_json::to_string(event)?;
        Ok(self.deliver(Target::Rooms(rooms), &text).await)
    }

    pub async fn broadcast_to_all(&self, event: &RealtimeEvent) -> Result<usize, NotifyError> {
        let text = serde_json::to_string(event)?;
        Ok(self.deliver(Target::All, &text).await)
    }

    /// Best-effort fan-out. Subscribers whose channel is closed or full are
    /// disconnected once the delivery loop is done.
    async fn deliver(&self, target: Target<'_>, text: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let registry = self.registry.read().await;
            let recipients: HashSet<&String> = match target {
                Target::All => registry.subscribers.keys().collect(),
                Target::Rooms(rooms) => rooms
                    .iter()
                    .filter_map(|room| registry.rooms.get(*room))
                    .flatten()
                    .collect(),
            };

            for id in recipients {
                let Some(subscriber) = registry.subscribers.get(id) else {
                    continue;
                };
                match subscriber.sender.try_send(OutboundFrame::Text(text.to_string())) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("subscriber {id} is {SUBSCRIBER_BUFFER} frames behind");
                        failed.push(id.clone());
                    }
                    Err(TrySendError::Closed(_)) => failed.push(id.clone()),
                }
            }
        }

        for id in failed {
            warn!("delivery to subscriber {id} failed, disconnecting");
            self.disconnect(&id).await;
        }

        trace!("delivered to {delivered} subscribers");
        delivered
    }

    /// Publishes an event once for the other hub instances. Room events
    /// carry their full room list so a remote subscriber in several of those
    /// rooms still gets a single copy.
    pub async fn publish_cross_process(&self, event: &RealtimeEvent) -> Result<(), NotifyError> {
        let envelope = self.envelope(event)?;
        self.bus.publish(envelope).await
    }

    fn envelope(&self, event: &RealtimeEvent) -> Result<BusEnvelope, NotifyError> {
        let (channel, rooms) = if event.is_broadcast() {
            (BROADCAST_CHANNEL.to_string(), Vec::new())
        } else {
            let rooms = event.rooms();
            let channel = rooms
                .first()
                .map(|room| room_channel(room))
                .unwrap_or_else(|| BROADCAST_CHANNEL.to_string());
            (channel, rooms)
        };

        Ok(BusEnvelope {
            origin: self.instance_id.clone(),
            channel,
            rooms,
            payload: serde_json::to_string(event)?,
        })
    }

    /// Re-broadcasts envelopes published by other instances into the rooms
    /// they list, or to everyone for the broadcast channel. The listener
    /// resubscribes after a delay whenever the bus goes away.
    pub fn spawn_bus_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let notifier = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let mut receiver = notifier.bus.subscribe();
                loop {
                    match receiver.recv().await {
                        Ok(envelope) => notifier.rebroadcast(envelope).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("bus listener lagged, skipped {skipped} envelopes");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                warn!(
                    "event bus closed, resubscribing in {}s",
                    BUS_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(BUS_RETRY_DELAY).await;
            }
        })
    }

    #[instrument(skip(self, envelope), fields(channel = %envelope.channel))]
    async fn rebroadcast(&self, envelope: BusEnvelope) {
        if envelope.origin == self.instance_id {
            return;
        }

        let delivered = if envelope.channel == BROADCAST_CHANNEL {
            self.deliver(Target::All, &envelope.payload).await
        } else if !envelope.rooms.is_empty() {
            let rooms: Vec<&str> = envelope.rooms.iter().map(String::as_str).collect();
            self.deliver(Target::Rooms(&rooms), &envelope.payload).await
        } else if let Some(room) = channel_room(&envelope.channel) {
            self.deliver(Target::Rooms(&[room]), &envelope.payload).await
        } else {
            debug!("ignoring envelope on unknown channel");
            return;
        };

        trace!("re-broadcast envelope from {} to {delivered} subscribers", envelope.origin);
    }

    pub async fn ping_all(&self) {
        let registry = self.registry.read().await;
        for subscriber in registry.subscribers.values() {
            // a full queue already has frames for the transport to flush
            let _ = subscriber.sender.try_send(OutboundFrame::Ping);
        }
    }

    /// Sends a close frame to every subscriber and forgets them all.
    pub async fn shutdown_all(&self) {
        let mut registry = self.registry.write().await;
        let count = registry.subscribers.len();
        for subscriber in registry.subscribers.values() {
            let _ = subscriber.sender.try_send(OutboundFrame::Close);
        }
        registry.subscribers.clear();
        registry.rooms.clear();
        info!("closed {count} subscriber connections");
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.read().await.subscribers.len()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }

    pub async fn room_members(&self, room: &str) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut members = registry
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        members.sort();
        members
    }
}

enum Target<'a> {
    All,
    Rooms(&'a [&'a str]),
}

/// Pings every subscriber periodically so dead transports are noticed.
pub fn start_heartbeat(notifier: Arc<RealtimeNotifier>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            trace!("heartbeat ping to {} subscribers", notifier.subscriber_count().await);
            notifier.ping_all().await;
        }
    })
}

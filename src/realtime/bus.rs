//! Cross-process event bus
//!
//! Several hub instances can serve subscribers for the same fleet. Every
//! event a hub pushes locally is also published once on the bus, and each hub
//! re-broadcasts the envelopes it did not publish itself.
//!
//! - **Local**: a tokio broadcast channel, single process
//! - **MQTT**: rumqttc client, one topic per channel under a common prefix

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::NotifyError;

/// Channel that reaches every subscriber of every instance.
pub const BROADCAST_CHANNEL: &str = "websocket:broadcast";

/// Channel carrying events for one room.
pub fn room_channel(room: &str) -> String {
    format!("websocket:{room}")
}

/// Room named by a channel, `None` for the broadcast channel or foreign channels.
pub fn channel_room(channel: &str) -> Option<&str> {
    channel
        .strip_prefix("websocket:")
        .filter(|room| !room.is_empty() && *room != "broadcast")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Instance id of the publishing hub.
    pub origin: String,
    pub channel: String,
    /// Every room the event targets. Empty for broadcasts and for envelopes
    /// from hubs that only name the channel.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// Serialized event, forwarded to subscribers as is.
    pub payload: String,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: BusEnvelope) -> Result<(), NotifyError>;

    /// New receiver for envelopes published from now on, by any instance.
    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope>;

    async fn shutdown(&self);
}

const BUS_CAPACITY: usize = 256;

/// In-process bus. Envelopes published here come straight back to every
/// receiver, including the publisher's own listener.
pub struct LocalBus {
    sender: broadcast::Sender<BusEnvelope>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, envelope: BusEnvelope) -> Result<(), NotifyError> {
        // no receivers is fine
        let receivers = self.sender.send(envelope).unwrap_or(0);
        trace!("local bus delivered to {receivers} receivers");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        self.sender.subscribe()
    }

    async fn shutdown(&self) {}
}

#[cfg(feature = "mqtt-bus")]
pub use mqtt::MqttBus;

#[cfg(feature = "mqtt-bus")]
mod mqtt {
    use std::time::Duration;

    use async_trait::async_trait;
    use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
    use tokio::sync::{Mutex, broadcast};
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    use super::{BUS_CAPACITY, BusEnvelope, EventBus};
    use crate::realtime::NotifyError;

    const RECONNECT_DELAY: Duration = Duration::from_secs(5);

    /// Bus backed by an MQTT broker.
    ///
    /// Envelopes are published as JSON on `{prefix}/{channel}`. The event loop
    /// task feeds every envelope received on `{prefix}/#` into a local
    /// broadcast channel, re-subscribing after each reconnect.
    pub struct MqttBus {
        client: AsyncClient,
        topic_prefix: String,
        sender: broadcast::Sender<BusEnvelope>,
        event_loop: Mutex<Option<JoinHandle<()>>>,
    }

    impl MqttBus {
        pub fn connect(host: &str, port: u16, client_id: &str, topic_prefix: &str) -> Self {
            let mut opts = MqttOptions::new(client_id, host, port);
            opts.set_keep_alive(Duration::from_secs(15));

            let (client, mut eventloop) = AsyncClient::new(opts, 10);
            let (sender, _) = broadcast::channel(BUS_CAPACITY);

            let filter = format!("{topic_prefix}/#");
            let loop_client = client.clone();
            let loop_sender = sender.clone();

            let event_loop = tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("connected to mqtt broker, subscribing to {filter}");
                            if let Err(e) = loop_client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                                warn!("mqtt subscribe failed: {e}");
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(p))) => {
                            match serde_json::from_slice::<BusEnvelope>(&p.payload) {
                                Ok(envelope) => {
                                    let _ = loop_sender.send(envelope);
                                }
                                Err(e) => debug!("ignoring malformed bus message on {}: {e}", p.topic),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("mqtt connection error, retrying in {}s: {e}", RECONNECT_DELAY.as_secs());
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            });

            Self {
                client,
                topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
                sender,
                event_loop: Mutex::new(Some(event_loop)),
            }
        }

        fn topic(&self, channel: &str) -> String {
            format!("{}/{}", self.topic_prefix, channel)
        }
    }

    #[async_trait]
    impl EventBus for MqttBus {
        async fn publish(&self, envelope: BusEnvelope) -> Result<(), NotifyError> {
            let payload = serde_json::to_vec(&envelope)?;
            self.client
                .publish(self.topic(&envelope.channel), QoS::AtLeastOnce, false, payload)
                .await
                .map_err(|e| NotifyError::Bus(e.to_string()))
        }

        fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
            self.sender.subscribe()
        }

        async fn shutdown(&self) {
            if let Err(e) = self.client.disconnect().await {
                debug!("mqtt disconnect failed: {e}");
            }
            if let Some(handle) = self.event_loop.lock().await.take() {
                handle.abort();
            }
        }
    }
}

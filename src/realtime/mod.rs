//! Realtime push to dashboard subscribers
//!
//! ```text
//! NotificationWorker ──► RealtimeNotifier ──► subscriber channels ──► WebSocket
//!          │                    ▲
//!          └──► EventBus ───────┘ (envelopes from other hub instances)
//! ```

pub mod bus;
pub mod events;
pub mod notifier;

pub use bus::{BusEnvelope, EventBus, LocalBus};
#[cfg(feature = "mqtt-bus")]
pub use bus::MqttBus;
pub use events::{NotificationLevel, RealtimeEvent};
pub use notifier::{HEARTBEAT_INTERVAL, OutboundFrame, RealtimeNotifier, start_heartbeat};

use std::sync::Arc;

use crate::config::BusConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("unknown subscriber {0}")]
    UnknownSubscriber(String),

    #[error("subscriber {0} is no longer connected")]
    SubscriberGone(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("event bus error: {0}")]
    Bus(String),
}

/// Builds the configured cross-process bus.
pub fn open_bus(config: &BusConfig) -> Result<Arc<dyn EventBus>, NotifyError> {
    match config {
        BusConfig::Local => Ok(Arc::new(LocalBus::new())),
        #[cfg(feature = "mqtt-bus")]
        BusConfig::Mqtt {
            host,
            port,
            client_id,
            topic_prefix,
        } => Ok(Arc::new(MqttBus::connect(host, *port, client_id, topic_prefix))),
        #[cfg(not(feature = "mqtt-bus"))]
        BusConfig::Mqtt { .. } => Err(NotifyError::Bus(
            "mqtt bus requested but the mqtt-bus feature is disabled".to_string(),
        )),
    }
}

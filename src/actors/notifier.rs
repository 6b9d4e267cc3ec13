//! NotificationWorker - owns the send side of realtime notifications
//!
//! The scan pipeline hands events to this actor instead of pushing them
//! itself, so delivery problems are counted and logged in one place and never
//! reach a scan.
//!
//! ```text
//! coordinator ──Publish──► NotificationWorker ──► RealtimeNotifier (local rooms)
//!                                  └──queue──► bus publisher ──► EventBus (other instances)
//! ```
//!
//! Bus publishes run on their own task behind a bounded queue, each one
//! limited to `BUS_PUBLISH_TIMEOUT`. A hung broker costs dropped envelopes,
//! never local delivery.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::realtime::{RealtimeEvent, RealtimeNotifier};

use super::messages::{NotificationStats, NotifierCommand};

const COMMAND_BUFFER: usize = 256;
const PUBLISH_QUEUE: usize = 64;
pub const BUS_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct PublishCounters {
    published: AtomicU64,
    failures: AtomicU64,
}

pub struct NotificationWorker {
    notifier: Arc<RealtimeNotifier>,
    command_rx: mpsc::Receiver<NotifierCommand>,
    publish_tx: mpsc::Sender<RealtimeEvent>,
    counters: Arc<PublishCounters>,
    stats: NotificationStats,
}

impl NotificationWorker {
    /// Creates the worker and spawns its bus publisher, which stops once the
    /// worker is dropped and the queue is drained.
    pub fn new(notifier: Arc<RealtimeNotifier>, command_rx: mpsc::Receiver<NotifierCommand>) -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE);
        let counters = Arc::new(PublishCounters::default());
        tokio::spawn(run_publisher(notifier.clone(), publish_rx, counters.clone()));

        Self {
            notifier,
            command_rx,
            publish_tx,
            counters,
            stats: NotificationStats::default(),
        }
    }

    pub async fn run(mut self) {
        debug!("starting notification worker");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                NotifierCommand::Publish(event) => self.dispatch(event).await,

                NotifierCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(self.snapshot());
                }

                NotifierCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!(
            "notification worker stopped after {} events",
            self.stats.events
        );
    }

    async fn dispatch(&mut self, event: RealtimeEvent) {
        self.stats.events += 1;
        let kind = event.kind();

        match AssertUnwindSafe(fan_out(&self.notifier, &event)).catch_unwind().await {
            Ok(Ok(delivered)) => {
                trace!("{kind} delivered to {delivered} local subscribers");
                self.stats.delivered += delivered as u64;
            }
            Ok(Err(e)) => {
                warn!("failed to deliver {kind}: {e}");
                self.stats.failed += 1;
            }
            Err(_) => {
                error!("local delivery of {kind} panicked");
                self.stats.failed += 1;
            }
        }

        match self.publish_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("bus publish queue is full, dropping {kind}");
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => {
                error!("bus publisher is gone, dropping {kind}");
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> NotificationStats {
        NotificationStats {
            published: self.counters.published.load(Ordering::Relaxed),
            publish_failures: self.counters.failures.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }
}

async fn run_publisher(
    notifier: Arc<RealtimeNotifier>,
    mut queue: mpsc::Receiver<RealtimeEvent>,
    counters: Arc<PublishCounters>,
) {
    while let Some(event) = queue.recv().await {
        let kind = event.kind();
        match tokio::time::timeout(BUS_PUBLISH_TIMEOUT, notifier.publish_cross_process(&event)).await {
            Ok(Ok(())) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                warn!("failed to publish {kind} on the bus: {e}");
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                warn!(
                    "publishing {kind} on the bus timed out after {}s",
                    BUS_PUBLISH_TIMEOUT.as_secs()
                );
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    trace!("bus publisher stopped");
}

async fn fan_out(
    notifier: &RealtimeNotifier,
    event: &RealtimeEvent,
) -> Result<usize, crate::realtime::NotifyError> {
    if event.is_broadcast() {
        return notifier.broadcast_to_all(event).await;
    }

    let rooms = event.rooms();
    let rooms: Vec<&str> = rooms.iter().map(String::as_str).collect();
    notifier.broadcast_to_rooms(&rooms, event).await
}

/// Handle for the notification worker
#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
}

impl NotifierHandle {
    pub fn spawn(notifier: Arc<RealtimeNotifier>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(NotificationWorker::new(notifier, cmd_rx).run());
        Self { sender: cmd_tx }
    }

    /// Queues an event. Waits while the worker is saturated.
    pub async fn publish(&self, event: RealtimeEvent) -> Result<()> {
        self.sender
            .send(NotifierCommand::Publish(event))
            .await
            .context("notification worker is gone")
    }

    pub async fn get_stats(&self) -> Result<NotificationStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotifierCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive stats")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(NotifierCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}

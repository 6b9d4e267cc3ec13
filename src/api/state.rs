//! API shared state containing service handles

use std::sync::Arc;

use crate::actors::{CoordinatorHandle, NotifierHandle};
use crate::analyzer::HealthAnalyzer;
use crate::devices::DeviceRegistry;
use crate::log_collector::LogCollector;
use crate::realtime::RealtimeNotifier;
use crate::storage::AlertStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Device list and status board
    pub registry: Arc<dyn DeviceRegistry>,

    /// Active alerts
    pub store: Arc<dyn AlertStore>,

    /// Manual scan triggers
    pub coordinator: CoordinatorHandle,

    /// Connection tests
    pub analyzer: Arc<HealthAnalyzer>,

    /// On-demand event log collection
    pub log_collector: Arc<LogCollector>,

    /// WebSocket subscribers
    pub notifier: Arc<RealtimeNotifier>,

    /// Delivery statistics
    pub notifications: NotifierHandle,
}

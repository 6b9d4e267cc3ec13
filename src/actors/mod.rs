//! Long-lived tasks of the hub
//!
//! Each actor runs as an independent tokio task and is driven through a
//! cloneable handle that sends commands over an mpsc channel.
//!
//! ```text
//!          CoordinatorHandle                     NotifierHandle
//!                 │                                    │
//!        ┌────────▼─────────┐   events   ┌─────────────▼──────────┐
//!        │ ScanCoordinator  ├───────────►│  NotificationWorker    │
//!        └────────┬─────────┘            └─────────────┬──────────┘
//!                 │ fleet scan                         │
//!        ┌────────▼─────────┐                 RealtimeNotifier / EventBus
//!        │  FleetScheduler  │ (bounded JoinSet of device scans)
//!        └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel
//! 2. **Request/Response**: oneshot channels for queries and triggers
//! 3. **Completion**: a fleet scan reports its summary back to the coordinator

pub mod coordinator;
pub mod messages;
pub mod notifier;
pub mod scheduler;

pub use coordinator::{CoordinatorHandle, CoordinatorSettings, FleetPipeline, run_fleet_scan};
pub use messages::{FleetScanSummary, NotificationStats, TriggerResponse};
pub use notifier::NotifierHandle;
pub use scheduler::{FleetScheduler, RetryPolicy, ScanPolicy};

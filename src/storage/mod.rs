//! Alert persistence
//!
//! `AlertStore` is the persistence boundary of the pipeline: alert upserts
//! and resolutions, urgency rules, and the event-log watermark.
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database with migrations
//! - **In-Memory**: no persistence, for tests or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use redfish_monitoring::storage::{AlertStore, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteBackend::new("./alerts.db").await?;
//!     let active = store.active_alerts(None).await?;
//!     println!("{} active alerts", active.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{AlertStore, StoreHealth};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{AlertKey, AlertRow, AlertUpsert, LogWatermark, UpsertOutcome, UrgencyRule};

use crate::config::StorageConfig;

/// Opens the configured backend. No configuration means in-memory.
pub async fn open(config: Option<&StorageConfig>) -> StorageResult<Arc<dyn AlertStore>> {
    match config {
        None | Some(StorageConfig::None) => {
            info!("no persistent storage configured, alerts kept in memory");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        Some(StorageConfig::Sqlite { path, .. }) => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        Some(StorageConfig::Sqlite { .. }) => Err(StorageError::InvalidConfig(
            "sqlite backend requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}

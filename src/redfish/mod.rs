//! Redfish protocol client
//!
//! Talks to one out-of-band management controller at a time:
//!
//! ```text
//! RedfishClient::connect ──► RedfishSession ──► fetch_all()   ──► RawInventory
//!                                  │        └──► fetch_logs()  ──► Vec<LogEntry>
//!                                  └──► close()  (DELETE session)
//! ```
//!
//! A session is always torn down: either explicitly through `close()` or, if the
//! owning future is cancelled, by its `Drop` impl scheduling the logout on the
//! runtime.
//!
//! Sub-fetches of `fetch_all` run concurrently and fail independently. A failed
//! subsystem comes back empty and is listed in `RawInventory::degraded`, while a
//! failed `connect` is the only fatal outcome.

pub mod client;
pub mod error;
pub mod inventory;
pub(crate) mod json;
pub mod logs;

pub use client::{BmcEndpoint, RedfishClient, RedfishSession};
pub use error::RedfishError;
pub use inventory::{DegradedSubsystem, RawInventory, SystemInfo};
pub use logs::{LogEntry, LogKind, LogQuery, LogSeverity, LogSource};

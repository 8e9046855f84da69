//! errand-core - Core library for Errand
//!
//! This crate contains the offline action queue used by the Errand clients:
//! the durable queue store, the retrying request executor, the conflict
//! resolver registry, connectivity monitoring, and the sync queue manager
//! that ties them together.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncQueueConfig;
pub use error::{Error, Result};
pub use models::{ActionId, ActionKind, Priority, QueuedAction, SyncResult, SyncSummary};
pub use state::SyncState;
pub use sync::{ConnectivityMonitor, SyncError, SyncQueueManager};

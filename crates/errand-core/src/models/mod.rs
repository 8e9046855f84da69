//! Data models for Errand

mod action;
mod sync_result;

pub use action::{ActionId, ActionKind, Priority, QueuedAction};
pub use sync_result::{SyncProgress, SyncResult, SyncSummary};

//! Per-attempt and per-drain outcome types

use serde::Serialize;

use super::action::{ActionId, ActionKind};

/// Outcome of a single dispatch attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub action_id: ActionId,
    pub kind: ActionKind,
    pub error: Option<String>,
}

impl SyncResult {
    pub const fn succeeded(action_id: ActionId, kind: ActionKind) -> Self {
        Self {
            success: true,
            action_id,
            kind,
            error: None,
        }
    }

    pub fn failed(action_id: ActionId, kind: ActionKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action_id,
            kind,
            error: Some(error.into()),
        }
    }
}

/// Totals reported by a queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Attempts that never started: already in flight, no dispatcher, or
    /// removed mid-drain
    pub skipped: usize,
    pub total: usize,
}

impl SyncSummary {
    /// The summary returned when a drain refuses to run.
    pub const fn empty() -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            skipped: 0,
            total: 0,
        }
    }
}

/// Progress snapshot handed to drain observers after each action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
}

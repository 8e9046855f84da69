//! Shared cross-platform state types.

use serde::{Deserialize, Serialize};

/// Unified sync state reported by the queue manager to client status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Connectivity monitor reports no network.
    Offline,
    /// A drain is in progress.
    Syncing,
    /// Online with nothing left to deliver.
    Synced,
    /// Online, idle, with actions still waiting for a retry.
    Error,
}

impl SyncState {
    /// Derive the state from the manager's observable flags.
    pub const fn derive(online: bool, syncing: bool, pending: usize) -> Self {
        if !online {
            Self::Offline
        } else if syncing {
            Self::Syncing
        } else if pending == 0 {
            Self::Synced
        } else {
            Self::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_takes_precedence() {
        assert_eq!(SyncState::derive(false, true, 3), SyncState::Offline);
    }

    #[test]
    fn idle_state_depends_on_pending_count() {
        assert_eq!(SyncState::derive(true, false, 0), SyncState::Synced);
        assert_eq!(SyncState::derive(true, false, 2), SyncState::Error);
        assert_eq!(SyncState::derive(true, true, 2), SyncState::Syncing);
    }
}

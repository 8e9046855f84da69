//! Pending retries, represented as data

use tokio::time::Instant;

use crate::models::ActionId;

/// A re-attempt of `action_id` due at `due_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub action_id: ActionId,
    /// The attempt number this retry will be (1-based)
    pub attempt: u32,
    pub due_at: Instant,
}

/// At most one scheduled retry per action
#[derive(Debug, Default)]
pub struct RetrySchedule {
    entries: Vec<ScheduledRetry>,
}

impl RetrySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `retry`, replacing an earlier entry for the same action
    pub fn schedule(&mut self, retry: ScheduledRetry) {
        self.cancel(retry.action_id);
        self.entries.push(retry);
    }

    /// Drop the entry for `action_id`; returns whether one existed
    pub fn cancel(&mut self, action_id: ActionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.action_id != action_id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove and return every entry due at or before `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<ScheduledRetry> {
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.due_at <= now);
        self.entries = pending;
        due.sort_by_key(|entry| entry.due_at);
        due
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.due_at).min()
    }

    pub fn entries(&self) -> Vec<ScheduledRetry> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|entry| entry.due_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Queued action model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a queued action, using UUID v7 (time-sortable,
/// random suffix)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new unique action ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Delivery priority, derived from the action kind.
///
/// Ordering is significant: `High < Medium < Low`, so sorting ascending
/// yields dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// The closed set of operations that can be queued for synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateTask,
    AcceptTask,
    CompleteTask,
    SendMessage,
    RateUser,
    UpdateProfile,
    PurchasePowerup,
    SwitchMode,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::CreateTask,
        Self::AcceptTask,
        Self::CompleteTask,
        Self::SendMessage,
        Self::RateUser,
        Self::UpdateProfile,
        Self::PurchasePowerup,
        Self::SwitchMode,
    ];

    /// Fixed priority lookup for this kind.
    pub const fn priority(self) -> Priority {
        match self {
            Self::AcceptTask | Self::CompleteTask | Self::PurchasePowerup => Priority::High,
            Self::CreateTask | Self::SendMessage | Self::SwitchMode => Priority::Medium,
            Self::RateUser | Self::UpdateProfile => Priority::Low,
        }
    }

    /// Wire name (`snake_case`), also used in dispatch URLs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::AcceptTask => "accept_task",
            Self::CompleteTask => "complete_task",
            Self::SendMessage => "send_message",
            Self::RateUser => "rate_user",
            Self::UpdateProfile => "update_profile",
            Self::PurchasePowerup => "purchase_powerup",
            Self::SwitchMode => "switch_mode",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown action kind: {s}")))
    }
}

/// An action waiting in the offline queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Unique identifier
    pub id: ActionId,
    /// What operation this action represents
    pub kind: ActionKind,
    /// Opaque kind-specific data handed to the dispatcher
    pub payload: Value,
    /// Derived from `kind` at enqueue time
    pub priority: Priority,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Dispatch attempts so far
    pub attempts: u32,
    /// Timestamp of the most recent attempt (Unix ms)
    pub last_attempt_at: Option<i64>,
    /// Error message of the most recent failed attempt
    pub last_error: Option<String>,
}

impl QueuedAction {
    /// Create a new action for the given kind and payload
    #[must_use]
    pub fn new(kind: ActionKind, payload: Value) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            payload,
            priority: kind.priority(),
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Record the start of a dispatch attempt
    pub fn record_attempt(&mut self, now: i64) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);
    }
}

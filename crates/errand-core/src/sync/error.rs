//! Sync error taxonomy

use serde_json::Value;
use thiserror::Error;

use crate::models::{ActionId, ActionKind};

/// HTTP-like statuses worth retrying
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Transport error codes worth retrying
const RETRYABLE_CODES: [&str; 8] = [
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "ENETUNREACH",
    "EAI_AGAIN",
    "EPIPE",
];

/// Message fragments that indicate a transient network failure
const RETRYABLE_MESSAGE_HINTS: [&str; 5] = [
    "timeout",
    "timed out",
    "network request failed",
    "network error",
    "connection reset",
];

/// Failure reported by a remote dispatch function
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", self.describe())]
pub struct DispatchError {
    /// HTTP-like status code, when the remote answered
    pub status: Option<u16>,
    /// Transport error code (e.g. `ECONNRESET`), when it did not
    pub code: Option<String>,
    pub message: String,
    /// Server-side state returned with a conflict rejection
    pub server_state: Option<Value>,
}

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            server_state: None,
        }
    }

    /// A rejection carrying an HTTP-like status
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    /// A transport-level failure identified by an error code
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::new(message)
        }
    }

    /// A stale-state rejection (409) carrying the server's current value
    pub fn conflict(server_state: Value) -> Self {
        Self::status(409, "conflict with server state").with_server_state(server_state)
    }

    #[must_use]
    pub fn with_server_state(mut self, server_state: Value) -> Self {
        self.server_state = Some(server_state);
        self
    }

    /// Default retry classification: transient statuses, transport codes, or
    /// timeout-like messages.
    pub fn is_retryable(&self) -> bool {
        if let Some(status) = self.status {
            return RETRYABLE_STATUSES.contains(&status);
        }
        if let Some(code) = self.code.as_deref() {
            if RETRYABLE_CODES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(code))
            {
                return true;
            }
        }
        let message = self.message.to_ascii_lowercase();
        RETRYABLE_MESSAGE_HINTS
            .iter()
            .any(|hint| message.contains(hint))
    }

    /// True when the remote rejected the action because its state is stale
    pub fn is_conflict(&self) -> bool {
        matches!(self.status, Some(409 | 412))
    }

    fn describe(&self) -> String {
        match (self.status, self.code.as_deref()) {
            (Some(status), _) => format!("HTTP {status}: {}", self.message),
            (None, Some(code)) => format!("{code}: {}", self.message),
            (None, None) => self.message.clone(),
        }
    }
}

/// Errors produced while delivering queued actions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Dispatch was not attempted because the device is offline
    #[error("device is offline")]
    Offline,

    /// Retryable remote failure
    #[error("transient remote error: {0}")]
    Transient(DispatchError),

    /// Non-retryable remote rejection
    #[error("remote rejected action: {0}")]
    Terminal(DispatchError),

    /// Retry budget spent
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// No action with this id is queued
    #[error("action not found: {0}")]
    UnknownAction(ActionId),

    /// Another dispatch of the same action is running
    #[error("action {0} is already being dispatched")]
    InFlight(ActionId),

    /// No dispatch function registered for the kind
    #[error("no dispatcher registered for {0}")]
    NoDispatcher(ActionKind),

    /// Store read or write failed
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Dropped to keep the queue within its bound
    #[error("queue is full; action dropped")]
    QueueFull,
}

impl SyncError {
    /// Whether the attempt counter was charged for this failure
    pub const fn counts_as_attempt(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Terminal(_))
    }
}

impl From<DispatchError> for SyncError {
    fn from(error: DispatchError) -> Self {
        if error.is_retryable() {
            Self::Transient(error)
        } else {
            Self::Terminal(error)
        }
    }
}

impl From<crate::Error> for SyncError {
    fn from(error: crate::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transient_statuses_are_retryable() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(DispatchError::status(status, "x").is_retryable(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_terminal() {
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!DispatchError::status(status, "x").is_retryable(), "{status}");
        }
    }

    #[test]
    fn transport_codes_and_messages_are_retryable() {
        assert!(DispatchError::transport("ECONNRESET", "socket hang up").is_retryable());
        assert!(DispatchError::transport("econnrefused", "refused").is_retryable());
        assert!(DispatchError::new("Network request failed").is_retryable());
        assert!(DispatchError::new("request Timeout after 10s").is_retryable());
        assert!(!DispatchError::new("malformed payload").is_retryable());
        assert!(!DispatchError::transport("EINVAL", "bad argument").is_retryable());
    }

    #[test]
    fn status_takes_precedence_over_message() {
        let error = DispatchError::status(400, "timeout field is invalid");
        assert!(!error.is_retryable());
    }

    #[test]
    fn conflict_carries_server_state() {
        let error = DispatchError::conflict(json!({"name": "A"}));
        assert!(error.is_conflict());
        assert_eq!(error.server_state, Some(json!({"name": "A"})));
        assert!(matches!(SyncError::from(error), SyncError::Terminal(_)));
    }

    #[test]
    fn display_includes_status_or_code() {
        assert_eq!(
            DispatchError::status(503, "unavailable").to_string(),
            "HTTP 503: unavailable"
        );
        assert_eq!(
            DispatchError::transport("ETIMEDOUT", "slow").to_string(),
            "ETIMEDOUT: slow"
        );
    }

    #[test]
    fn only_remote_failures_count_as_attempts() {
        assert!(!SyncError::Offline.counts_as_attempt());
        assert!(!SyncError::NoDispatcher(ActionKind::RateUser).counts_as_attempt());
        assert!(SyncError::from(DispatchError::status(500, "boom")).counts_as_attempt());
    }
}

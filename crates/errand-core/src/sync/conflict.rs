//! Conflict resolver registry
//!
//! Maps each action kind to the policy used when the remote rejects a queued
//! change because its state moved on. The registry only hands policies out;
//! the caller applies them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ActionKind;

/// Fields consulted, in order, when comparing timestamps for latest-wins
const TIMESTAMP_FIELDS: [&str; 5] = ["updated_at", "timestamp", "sent_at", "created_at", "at"];

/// `(server_state, client_state) -> resolved_state`
pub type ResolveFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    ServerWins,
    ClientWins,
    Merge,
    LatestWins,
}

/// A strategy tag plus the function that implements it
#[derive(Clone)]
pub struct ConflictPolicy {
    pub strategy: ConflictStrategy,
    resolve: ResolveFn,
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConflictPolicy")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl ConflictPolicy {
    /// Pair a strategy tag with a custom resolve function
    pub fn custom(
        strategy: ConflictStrategy,
        resolve: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            strategy,
            resolve: Arc::new(resolve),
        }
    }

    /// The built-in implementation of `strategy`
    pub fn for_strategy(strategy: ConflictStrategy) -> Self {
        match strategy {
            ConflictStrategy::ServerWins => Self::server_wins(),
            ConflictStrategy::ClientWins => Self::client_wins(),
            ConflictStrategy::Merge => Self::merge(),
            ConflictStrategy::LatestWins => Self::latest_wins(),
        }
    }

    pub fn server_wins() -> Self {
        Self::custom(ConflictStrategy::ServerWins, |server, _client| server.clone())
    }

    pub fn client_wins() -> Self {
        Self::custom(ConflictStrategy::ClientWins, |_server, client| client.clone())
    }

    /// Shallow merge: client fields overwrite server fields of the same name
    pub fn merge() -> Self {
        Self::custom(ConflictStrategy::Merge, shallow_merge)
    }

    /// Whichever side carries the newer timestamp; ties go to the server
    pub fn latest_wins() -> Self {
        Self::custom(ConflictStrategy::LatestWins, |server, client| {
            match (timestamp_of(server), timestamp_of(client)) {
                (Some(server_at), Some(client_at)) if client_at > server_at => client.clone(),
                (None, Some(_)) => client.clone(),
                _ => server.clone(),
            }
        })
    }

    pub fn resolve(&self, server_state: &Value, client_state: &Value) -> Value {
        (self.resolve)(server_state, client_state)
    }
}

fn shallow_merge(server: &Value, client: &Value) -> Value {
    match (server, client) {
        (Value::Object(server_fields), Value::Object(client_fields)) => {
            let mut merged = server_fields.clone();
            for (key, value) in client_fields {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => client.clone(),
    }
}

/// Read a comparable timestamp (Unix ms or RFC 3339) from a state object
fn timestamp_of(state: &Value) -> Option<i64> {
    let fields = state.as_object()?;
    TIMESTAMP_FIELDS.iter().find_map(|name| match fields.get(*name)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => chrono::DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|parsed| parsed.timestamp_millis()),
        _ => None,
    })
}

/// Lookup table from action kind to conflict policy
#[derive(Debug, Clone)]
pub struct ConflictResolverRegistry {
    policies: HashMap<ActionKind, ConflictPolicy>,
}

impl Default for ConflictResolverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ActionKind::CreateTask, ConflictPolicy::client_wins());
        registry.register(ActionKind::UpdateProfile, ConflictPolicy::merge());
        registry.register(ActionKind::SendMessage, ConflictPolicy::latest_wins());
        registry
    }
}

impl ConflictResolverRegistry {
    /// A registry with no policies
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Register `policy` for `kind`, replacing any previous one
    pub fn register(&mut self, kind: ActionKind, policy: ConflictPolicy) -> Option<ConflictPolicy> {
        self.policies.insert(kind, policy)
    }

    pub fn get(&self, kind: ActionKind) -> Option<&ConflictPolicy> {
        self.policies.get(&kind)
    }
}

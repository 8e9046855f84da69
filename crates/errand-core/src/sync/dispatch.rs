//! Per-kind remote dispatch

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{ActionKind, QueuedAction};

use super::error::DispatchError;

/// Performs the remote side effect of a queued action.
///
/// Receivers should treat `action.id` as an idempotency key: a crash between
/// a successful dispatch and its removal from the queue causes a resubmission.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, action: &QueuedAction) -> Result<Value, DispatchError>;
}

struct FnDispatcher<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> Dispatcher for FnDispatcher<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, DispatchError>> + Send,
{
    async fn dispatch(&self, action: &QueuedAction) -> Result<Value, DispatchError> {
        (self.handler)(action.payload.clone()).await
    }
}

/// Wrap a `payload -> result` async function as a dispatcher
pub fn dispatch_fn<F, Fut>(handler: F) -> Arc<dyn Dispatcher>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
{
    Arc::new(FnDispatcher { handler })
}

/// Registration map from action kind to dispatcher
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    dispatchers: HashMap<ActionKind, Arc<dyn Dispatcher>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dispatcher` for `kind`, replacing any previous one
    pub fn register(&mut self, kind: ActionKind, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.insert(kind, dispatcher);
    }

    /// Register one dispatcher for every action kind
    pub fn register_all(&mut self, dispatcher: &Arc<dyn Dispatcher>) {
        for kind in ActionKind::ALL {
            self.register(kind, Arc::clone(dispatcher));
        }
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Dispatcher>> {
        self.dispatchers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.dispatchers.contains_key(&kind)
    }
}

//! Sync queue manager
//!
//! Single owner of the pending-action queue. Every mutation is persisted to
//! the [`QueueStore`] while the queue lock is held, so no later operation can
//! observe an in-memory state that is not also durable (or explicitly
//! degraded after a failed write).

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::SyncQueueConfig;
use crate::db::{decode_queue, encode_queue, QueueStore};
use crate::models::{
    ActionId, ActionKind, QueuedAction, SyncProgress, SyncResult, SyncSummary,
};
use crate::state::SyncState;
use crate::util::unix_millis_now;

use super::conflict::{ConflictPolicy, ConflictResolverRegistry, ConflictStrategy};
use super::connectivity::ConnectivityMonitor;
use super::dispatch::{DispatchRegistry, Dispatcher};
use super::error::{DispatchError, SyncError};
use super::executor::execute_with_retry;
use super::schedule::{RetrySchedule, ScheduledRetry};


/// Notification delivered to queue listeners
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The queue contents after a mutation (also replayed on subscribe)
    Changed(Vec<QueuedAction>),
    /// An action was delivered and removed
    Completed(SyncResult),
    /// An action was removed without being delivered
    Evicted(SyncResult),
}

pub type QueueListener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    listeners: BTreeMap<u64, QueueListener>,
}

/// Handle returned by [`SyncQueueManager::on_queue_change`]
#[must_use = "dropping the subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<ListenerSet>>,
}

impl Subscription {
    /// Stop delivering events to this listener
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).listeners.remove(&self.id);
        }
    }
}

/// Retry work queue shared with the background worker
#[derive(Default)]
struct RetryQueue {
    schedule: Mutex<RetrySchedule>,
    changed: Notify,
    closed: AtomicBool,
}

impl RetryQueue {
    fn schedule(&self, retry: ScheduledRetry) {
        lock(&self.schedule).schedule(retry);
        self.changed.notify_one();
    }

    fn cancel(&self, action_id: ActionId) -> bool {
        let cancelled = lock(&self.schedule).cancel(action_id);
        if cancelled {
            self.changed.notify_one();
        }
        cancelled
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.changed.notify_one();
    }
}

struct Inner {
    config: SyncQueueConfig,
    store: Arc<dyn QueueStore>,
    connectivity: ConnectivityMonitor,
    queue: tokio::sync::Mutex<Vec<QueuedAction>>,
    dispatchers: RwLock<DispatchRegistry>,
    resolvers: RwLock<ConflictResolverRegistry>,
    listeners: Arc<Mutex<ListenerSet>>,
    retries: Arc<RetryQueue>,
    in_flight: Mutex<HashSet<ActionId>>,
    syncing: AtomicBool,
    degraded: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.retries.close();
    }
}

/// Clears the single-flight flag when a drain ends
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Marks one action as being dispatched
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<ActionId>>,
    id: ActionId,
}

impl<'a> InFlightGuard<'a> {
    fn claim(set: &'a Mutex<HashSet<ActionId>>, id: ActionId) -> Option<Self> {
        if lock(set).insert(id) {
            Some(Self { set, id })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the offline action queue.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct SyncQueueManager {
    inner: Arc<Inner>,
}

impl SyncQueueManager {
    /// Build a manager over `store`, restoring whatever it last saved.
    ///
    /// A missing, unreadable, or corrupt blob yields an empty queue; the
    /// failure is logged rather than returned. Only an invalid `config` is an
    /// error. Restored actions that already failed get their retry scheduled
    /// again from `last_attempt_at`. Must be called inside a Tokio runtime:
    /// the retry worker is spawned here.
    pub async fn new(
        config: SyncQueueConfig,
        store: Arc<dyn QueueStore>,
        connectivity: ConnectivityMonitor,
    ) -> crate::Result<Self> {
        config.validate()?;

        let mut degraded = false;
        let mut actions = match store.load().await {
            Ok(Some(serialized)) => decode_queue(&serialized).unwrap_or_else(|error| {
                tracing::warn!("Discarding unreadable stored queue: {}", error);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(error) => {
                tracing::warn!("Failed to load stored queue, starting empty: {}", error);
                degraded = true;
                Vec::new()
            }
        };

        let max_retries = config.max_retries;
        actions.retain(|action| {
            let keep = action.attempts < max_retries;
            if !keep {
                tracing::warn!(
                    action_id = %action.id,
                    kind = %action.kind,
                    attempts = action.attempts,
                    "Dropping restored action that already spent its retry budget"
                );
            }
            keep
        });
        tracing::debug!("Restored {} queued actions", actions.len());

        let retries = RetryQueue::default();
        {
            let now = Instant::now();
            let now_ms = unix_millis_now();
            let mut schedule = lock(&retries.schedule);
            for action in actions.iter().filter(|action| action.attempts > 0) {
                schedule.schedule(restored_retry(&config, action, now, now_ms));
            }
            if !schedule.is_empty() {
                tracing::debug!("Rescheduled {} restored retries", schedule.len());
            }
        }

        let inner = Arc::new(Inner {
            config,
            store,
            connectivity,
            queue: tokio::sync::Mutex::new(actions),
            dispatchers: RwLock::new(DispatchRegistry::new()),
            resolvers: RwLock::new(ConflictResolverRegistry::default()),
            listeners: Arc::new(Mutex::new(ListenerSet::default())),
            retries: Arc::new(retries),
            in_flight: Mutex::new(HashSet::new()),
            syncing: AtomicBool::new(false),
            degraded: AtomicBool::new(degraded),
        });

        tokio::spawn(run_retry_worker(
            Arc::downgrade(&inner),
            Arc::clone(&inner.retries),
        ));

        Ok(Self { inner })
    }

    pub fn config(&self) -> &SyncQueueConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// True while the last persistence attempt failed and the queue is
    /// running in memory only.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SyncState {
        let pending = self.get_queue_count().await;
        SyncState::derive(
            self.inner.connectivity.is_online(),
            self.is_syncing(),
            pending,
        )
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Install the remote dispatch function for `kind`
    pub fn register_dispatcher(&self, kind: ActionKind, dispatcher: Arc<dyn Dispatcher>) {
        self.inner
            .dispatchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind, dispatcher);
    }

    /// Install one dispatcher for every kind
    pub fn register_dispatcher_for_all(&self, dispatcher: &Arc<dyn Dispatcher>) {
        self.inner
            .dispatchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_all(dispatcher);
    }

    pub fn register_conflict_resolver(&self, kind: ActionKind, policy: ConflictPolicy) {
        self.inner
            .resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind, policy);
    }

    pub fn get_conflict_resolver(&self, kind: ActionKind) -> Option<ConflictPolicy> {
        self.inner
            .resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    fn dispatcher_for(&self, kind: ActionKind) -> Option<Arc<dyn Dispatcher>> {
        self.inner
            .dispatchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Subscribe to queue events. The current queue is replayed to
    /// `listener` as a `Changed` event before this returns.
    pub async fn on_queue_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        let listener: QueueListener = Arc::new(listener);
        let queue = self.inner.queue.lock().await;
        listener(&QueueEvent::Changed(queue.clone()));

        let mut listeners = lock(&self.inner.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.listeners.insert(id, listener);

        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    fn notify(&self, event: &QueueEvent) {
        let listeners: Vec<QueueListener> = lock(&self.inner.listeners)
            .listeners
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn persist(&self, queue: &[QueuedAction]) -> Result<(), SyncError> {
        let serialized = encode_queue(queue)?;
        self.inner.store.save(&serialized).await?;
        Ok(())
    }

    /// Persist, degrading to memory-only operation on failure
    async fn persist_or_degrade(&self, queue: &[QueuedAction]) {
        match self.persist(queue).await {
            Ok(()) => {
                if self.inner.degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("Queue persistence recovered");
                }
            }
            Err(error) => {
                if !self.inner.degraded.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        "Queue persistence failed, continuing in memory only: {}",
                        error
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection and administration
    // ------------------------------------------------------------------

    pub async fn get_queue(&self) -> Vec<QueuedAction> {
        self.inner.queue.lock().await.clone()
    }

    pub async fn get_queue_count(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    pub async fn get_action(&self, id: ActionId) -> Option<QueuedAction> {
        self.inner
            .queue
            .lock()
            .await
            .iter()
            .find(|action| action.id == id)
            .cloned()
    }

    /// Remove an action without delivering it. Returns whether it was queued.
    pub async fn remove_action(&self, id: ActionId) -> bool {
        let snapshot = {
            let mut queue = self.inner.queue.lock().await;
            let Some(position) = queue.iter().position(|action| action.id == id) else {
                return false;
            };
            queue.remove(position);
            self.persist_or_degrade(&queue).await;
            queue.clone()
        };
        self.inner.retries.cancel(id);
        tracing::debug!(action_id = %id, "Removed queued action");
        self.notify(&QueueEvent::Changed(snapshot));
        true
    }

    /// Drop every queued action and pending retry
    pub async fn clear_queue(&self) {
        {
            let mut queue = self.inner.queue.lock().await;
            queue.clear();
            self.persist_or_degrade(&queue).await;
        }
        lock(&self.inner.retries.schedule).clear();
        self.inner.retries.changed.notify_one();
        tracing::info!("Cleared sync queue");
        self.notify(&QueueEvent::Changed(Vec::new()));
    }

    /// Pending retries, earliest first
    pub fn scheduled_retries(&self) -> Vec<ScheduledRetry> {
        lock(&self.inner.retries.schedule).entries()
    }

    /// Cancel the pending retry of `id`; the action stays queued
    pub fn cancel_retry(&self, id: ActionId) -> bool {
        self.inner.retries.cancel(id)
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Queue an action. Never fails: persistence problems degrade to
    /// in-memory queuing.
    ///
    /// When online and `execute_immediately` is set, a dispatch attempt is
    /// started in the background. A full queue makes room by dropping an
    /// older entry, never the one being added.
    pub async fn enqueue(
        &self,
        kind: ActionKind,
        payload: Value,
        execute_immediately: bool,
    ) -> ActionId {
        let id = self.insert(kind, payload).await;

        if execute_immediately && self.inner.connectivity.is_online() {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.sync_action(id).await;
            });
        }
        id
    }

    /// Queue an action and, when online, wait for its first dispatch attempt
    pub async fn enqueue_and_dispatch(
        &self,
        kind: ActionKind,
        payload: Value,
    ) -> (ActionId, Option<SyncResult>) {
        let id = self.insert(kind, payload).await;
        if !self.inner.connectivity.is_online() {
            return (id, None);
        }
        let result = self.sync_action(id).await;
        (id, result)
    }

    async fn insert(&self, kind: ActionKind, payload: Value) -> ActionId {
        let action = QueuedAction::new(kind, payload);
        let id = action.id;

        let (snapshot, dropped) = {
            let mut queue = self.inner.queue.lock().await;
            let dropped = if queue.len() >= self.inner.config.max_queue_len {
                evict_for_capacity(&mut queue)
            } else {
                None
            };
            queue.push(action);
            self.persist_or_degrade(&queue).await;
            (queue.clone(), dropped)
        };

        tracing::debug!(action_id = %id, %kind, "Enqueued action");
        self.notify(&QueueEvent::Changed(snapshot));

        if let Some(dropped) = dropped {
            self.inner.retries.cancel(dropped.id);
            tracing::warn!(
                action_id = %dropped.id,
                kind = %dropped.kind,
                "Queue full; dropped lowest-priority action"
            );
            self.notify(&QueueEvent::Evicted(SyncResult::failed(
                dropped.id,
                dropped.kind,
                SyncError::QueueFull.to_string(),
            )));
        }
        id
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Drain the queue in priority order, one action at a time.
    ///
    /// Returns zeros without dispatching when offline or when another drain
    /// is already running. Actions whose attempt could not start (already in
    /// flight, no dispatcher) are counted as skipped, not failed.
    pub async fn sync_all(
        &self,
        on_progress: Option<&(dyn Fn(SyncProgress) + Send + Sync)>,
    ) -> SyncSummary {
        self.drain(|_| true, on_progress).await
    }

    /// Drain only the actions with no pending retry: never attempted, or
    /// whose retry was dropped while offline.
    pub async fn sync_unscheduled(&self) -> SyncSummary {
        let scheduled: HashSet<ActionId> = self
            .scheduled_retries()
            .iter()
            .map(|retry| retry.action_id)
            .collect();
        self.drain(|action| !scheduled.contains(&action.id), None).await
    }

    async fn drain(
        &self,
        include: impl Fn(&QueuedAction) -> bool,
        on_progress: Option<&(dyn Fn(SyncProgress) + Send + Sync)>,
    ) -> SyncSummary {
        if !self.inner.connectivity.is_online() {
            tracing::debug!("Skipping sync: offline");
            return SyncSummary::empty();
        }
        let Some(_drain) = DrainGuard::acquire(&self.inner.syncing) else {
            tracing::debug!("Skipping sync: a drain is already running");
            return SyncSummary::empty();
        };

        let mut pending = self.get_queue().await;
        pending.retain(&include);
        pending.sort_by_key(|action| action.priority);

        let mut summary = SyncSummary {
            total: pending.len(),
            ..SyncSummary::empty()
        };
        if pending.is_empty() {
            return summary;
        }
        tracing::info!("Syncing {} queued actions", summary.total);

        let pause = self.inner.config.inter_action_delay();
        for (index, action) in pending.iter().enumerate() {
            if !self.inner.connectivity.is_online() {
                tracing::info!("Connectivity lost; stopping sync");
                break;
            }
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            match self.try_sync_action(action.id).await {
                Ok(result) if result.success => summary.succeeded += 1,
                Ok(_) => summary.failed += 1,
                Err(error) => {
                    tracing::debug!(action_id = %action.id, "Skipped during sync: {}", error);
                    summary.skipped += 1;
                }
            }

            if let Some(on_progress) = on_progress {
                on_progress(SyncProgress {
                    completed: index + 1,
                    total: summary.total,
                });
            }
        }

        tracing::info!(
            "Sync finished: {} succeeded, {} failed, {} skipped of {}",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.total
        );
        summary
    }

    /// Attempt one action now. `None` if `id` is not queued.
    pub async fn run_one(&self, id: ActionId) -> Option<SyncResult> {
        self.sync_action(id).await
    }

    /// Dispatch every scheduled retry whose time has come.
    ///
    /// Retries that come due while offline are dropped; the action stays
    /// queued for the next drain.
    pub async fn run_due(&self) -> Vec<SyncResult> {
        let due = lock(&self.inner.retries.schedule).take_due(Instant::now());
        if due.is_empty() {
            return Vec::new();
        }
        if !self.inner.connectivity.is_online() {
            tracing::debug!("Dropping {} due retries while offline", due.len());
            return Vec::new();
        }

        let mut results = Vec::with_capacity(due.len());
        for retry in due {
            tracing::debug!(action_id = %retry.action_id, attempt = retry.attempt, "Running scheduled retry");
            if let Some(result) = self.sync_action(retry.action_id).await {
                results.push(result);
            }
        }
        results
    }

    async fn sync_action(&self, id: ActionId) -> Option<SyncResult> {
        match self.try_sync_action(id).await {
            Ok(result) => Some(result),
            Err(SyncError::UnknownAction(_)) => None,
            Err(error) => {
                let kind = self.get_action(id).await?.kind;
                tracing::debug!(action_id = %id, "Dispatch not attempted: {}", error);
                Some(SyncResult::failed(id, kind, error.to_string()))
            }
        }
    }

    /// One dispatch attempt. `Err` means the attempt never started.
    async fn try_sync_action(&self, id: ActionId) -> Result<SyncResult, SyncError> {
        let kind = self
            .get_action(id)
            .await
            .ok_or(SyncError::UnknownAction(id))?
            .kind;
        let _claim =
            InFlightGuard::claim(&self.inner.in_flight, id).ok_or(SyncError::InFlight(id))?;

        if !self.inner.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let dispatcher = self
            .dispatcher_for(kind)
            .ok_or(SyncError::NoDispatcher(kind))?;

        let action = self.begin_attempt(id).await?;
        let outcome = self.deliver(dispatcher.as_ref(), &action).await;

        Ok(match outcome {
            Ok(()) => self.complete(&action).await,
            Err(error) => self.fail(&action, error).await,
        })
    }

    /// Count the attempt and persist it before touching the network
    async fn begin_attempt(&self, id: ActionId) -> Result<QueuedAction, SyncError> {
        self.inner.retries.cancel(id);
        let (action, snapshot) = {
            let mut queue = self.inner.queue.lock().await;
            let action = queue
                .iter_mut()
                .find(|action| action.id == id)
                .ok_or(SyncError::UnknownAction(id))?;
            action.record_attempt(unix_millis_now());
            let action = action.clone();
            self.persist_or_degrade(&queue).await;
            (action, queue.clone())
        };
        tracing::debug!(action_id = %id, kind = %action.kind, attempt = action.attempts, "Dispatching action");
        self.notify(&QueueEvent::Changed(snapshot));
        Ok(action)
    }

    async fn deliver(
        &self,
        dispatcher: &dyn Dispatcher,
        action: &QueuedAction,
    ) -> Result<(), SyncError> {
        match self.dispatch_once(dispatcher, action).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_conflict() => {
                self.resolve_conflict(dispatcher, action, error).await
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn dispatch_once(
        &self,
        dispatcher: &dyn Dispatcher,
        action: &QueuedAction,
    ) -> Result<Value, DispatchError> {
        execute_with_retry(
            || dispatcher.dispatch(action),
            &self.inner.config.transport_retry,
        )
        .await
    }

    /// Apply the kind's conflict policy and resubmit once within this attempt
    async fn resolve_conflict(
        &self,
        dispatcher: &dyn Dispatcher,
        action: &QueuedAction,
        error: DispatchError,
    ) -> Result<(), SyncError> {
        let Some(policy) = self.get_conflict_resolver(action.kind) else {
            return Err(error.into());
        };
        let Some(server_state) = error.server_state.as_ref() else {
            return Err(error.into());
        };

        if policy.strategy == ConflictStrategy::ServerWins {
            tracing::info!(action_id = %action.id, kind = %action.kind, "Conflict resolved in favour of server");
            return Ok(());
        }

        let resolved = policy.resolve(server_state, &action.payload);
        tracing::info!(
            action_id = %action.id,
            kind = %action.kind,
            strategy = ?policy.strategy,
            "Resubmitting action with resolved conflict state"
        );
        self.replace_payload(action.id, resolved.clone()).await?;

        let mut resolved_action = action.clone();
        resolved_action.payload = resolved;
        self.dispatch_once(dispatcher, &resolved_action)
            .await
            .map(drop)
            .map_err(SyncError::from)
    }

    async fn replace_payload(&self, id: ActionId, payload: Value) -> Result<(), SyncError> {
        let snapshot = {
            let mut queue = self.inner.queue.lock().await;
            let action = queue
                .iter_mut()
                .find(|action| action.id == id)
                .ok_or(SyncError::UnknownAction(id))?;
            action.payload = payload;
            self.persist_or_degrade(&queue).await;
            queue.clone()
        };
        self.notify(&QueueEvent::Changed(snapshot));
        Ok(())
    }

    async fn complete(&self, action: &QueuedAction) -> SyncResult {
        let snapshot = {
            let mut queue = self.inner.queue.lock().await;
            queue.retain(|queued| queued.id != action.id);
            self.persist_or_degrade(&queue).await;
            queue.clone()
        };
        self.inner.retries.cancel(action.id);

        tracing::info!(action_id = %action.id, kind = %action.kind, attempts = action.attempts, "Action synced");
        let result = SyncResult::succeeded(action.id, action.kind);
        self.notify(&QueueEvent::Changed(snapshot));
        self.notify(&QueueEvent::Completed(result.clone()));
        result
    }

    async fn fail(&self, action: &QueuedAction, error: SyncError) -> SyncResult {
        let max_retries = self.inner.config.max_retries;
        let terminal =
            matches!(error, SyncError::Terminal(_)) && self.inner.config.evict_on_terminal_error;
        let exhausted = action.attempts >= max_retries;

        if terminal || exhausted {
            let reason = if terminal {
                error
            } else {
                SyncError::Exhausted {
                    attempts: action.attempts,
                    last_error: error.to_string(),
                }
            };
            return self.evict(action, &reason).await;
        }

        let message = error.to_string();
        let snapshot = {
            let mut queue = self.inner.queue.lock().await;
            let Some(queued) = queue.iter_mut().find(|queued| queued.id == action.id) else {
                // Removed while the attempt was running
                return SyncResult::failed(action.id, action.kind, message);
            };
            queued.last_error = Some(message.clone());
            self.persist_or_degrade(&queue).await;
            queue.clone()
        };

        let delay = self.inner.config.retry_delay(action.attempts);
        self.inner.retries.schedule(ScheduledRetry {
            action_id: action.id,
            attempt: action.attempts + 1,
            due_at: Instant::now() + delay,
        });
        tracing::warn!(
            action_id = %action.id,
            kind = %action.kind,
            attempt = action.attempts,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Action dispatch failed: {}",
            message
        );

        self.notify(&QueueEvent::Changed(snapshot));
        SyncResult::failed(action.id, action.kind, message)
    }

    async fn evict(&self, action: &QueuedAction, reason: &SyncError) -> SyncResult {
        let snapshot = {
            let mut queue = self.inner.queue.lock().await;
            let Some(position) = queue.iter().position(|queued| queued.id == action.id) else {
                // Removed while the attempt was running
                return SyncResult::failed(action.id, action.kind, reason.to_string());
            };
            queue.remove(position);
            self.persist_or_degrade(&queue).await;
            queue.clone()
        };
        self.inner.retries.cancel(action.id);

        tracing::warn!(
            action_id = %action.id,
            kind = %action.kind,
            attempts = action.attempts,
            "Action permanently failed: {}",
            reason
        );
        let result = SyncResult::failed(action.id, action.kind, reason.to_string());
        self.notify(&QueueEvent::Changed(snapshot));
        self.notify(&QueueEvent::Evicted(result.clone()));
        result
    }
}

/// Remove the oldest action of the lowest priority present
fn evict_for_capacity(queue: &mut Vec<QueuedAction>) -> Option<QueuedAction> {
    let position = queue
        .iter()
        .enumerate()
        .max_by(|(left_index, left), (right_index, right)| {
            left.priority
                .cmp(&right.priority)
                .then(right_index.cmp(left_index))
        })
        .map(|(index, _)| index)?;
    Some(queue.remove(position))
}

/// Rebuild the pending retry of a restored action from its last attempt
fn restored_retry(
    config: &SyncQueueConfig,
    action: &QueuedAction,
    now: Instant,
    now_ms: i64,
) -> ScheduledRetry {
    let delay = config.retry_delay(action.attempts);
    let elapsed = action.last_attempt_at.map_or(delay, |attempted_at| {
        Duration::from_millis(u64::try_from(now_ms.saturating_sub(attempted_at)).unwrap_or(0))
    });
    ScheduledRetry {
        action_id: action.id,
        attempt: action.attempts + 1,
        due_at: now + delay.saturating_sub(elapsed),
    }
}

/// Fire scheduled retries as they come due. Exits once the manager is dropped.
async fn run_retry_worker(manager: Weak<Inner>, retries: Arc<RetryQueue>) {
    loop {
        if retries.closed.load(Ordering::SeqCst) {
            return;
        }

        let next_due = lock(&retries.schedule).next_due();
        match next_due {
            Some(due_at) => {
                tokio::select! {
                    () = tokio::time::sleep_until(due_at) => {}
                    () = retries.changed.notified() => continue,
                }
            }
            None => {
                retries.changed.notified().await;
                continue;
            }
        }

        let Some(inner) = manager.upgrade() else {
            return;
        };
        SyncQueueManager { inner }.run_due().await;
    }
}

//! Foreground and connectivity trigger
//!
//! Turns two platform signals into manager calls: an offline to online
//! transition drains the queue, and a return to the foreground fires retries
//! whose time came while the app was suspended, then delivers actions that
//! have no retry pending. Overlapping drains are
//! refused by the manager itself, so flapping connectivity needs no debounce
//! here.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::manager::SyncQueueManager;

/// Application lifecycle as reported by the platform shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Background task bridging lifecycle and connectivity into syncs.
///
/// Dropping the trigger stops it.
pub struct SyncTrigger {
    lifecycle: watch::Sender<AppLifecycle>,
    task: JoinHandle<()>,
}

impl SyncTrigger {
    /// Start watching `manager`'s connectivity monitor. The app is assumed to
    /// be in the foreground.
    pub fn spawn(manager: SyncQueueManager) -> Self {
        let (lifecycle, lifecycle_rx) = watch::channel(AppLifecycle::Foreground);
        let online_rx = manager.connectivity().subscribe();
        let task = tokio::spawn(run_trigger(manager, online_rx, lifecycle_rx));
        Self { lifecycle, task }
    }

    /// Report a lifecycle change from the platform shell
    pub fn app_state_changed(&self, state: AppLifecycle) {
        self.lifecycle.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        *self.lifecycle.borrow()
    }
}

impl Drop for SyncTrigger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_trigger(
    manager: SyncQueueManager,
    mut online_rx: watch::Receiver<bool>,
    mut lifecycle_rx: watch::Receiver<AppLifecycle>,
) {
    let mut was_online = *online_rx.borrow();
    let mut was_foreground = *lifecycle_rx.borrow() == AppLifecycle::Foreground;

    loop {
        tokio::select! {
            changed = online_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let online = *online_rx.borrow_and_update();
                if online && !was_online {
                    on_reconnect(&manager).await;
                }
                was_online = online;
            }
            changed = lifecycle_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let foreground = *lifecycle_rx.borrow_and_update() == AppLifecycle::Foreground;
                if foreground && !was_foreground {
                    on_foreground(&manager).await;
                }
                was_foreground = foreground;
            }
        }
    }
}

async fn on_reconnect(manager: &SyncQueueManager) {
    let pending = manager.get_queue_count().await;
    if pending == 0 {
        return;
    }
    tracing::info!(pending, "Back online; draining queue");
    let manager = manager.clone();
    tokio::spawn(async move {
        manager.sync_all(None).await;
    });
}

async fn on_foreground(manager: &SyncQueueManager) {
    let fired = manager.run_due().await;
    if !fired.is_empty() {
        tracing::info!("Ran {} overdue retries on foreground", fired.len());
    }
    let manager = manager.clone();
    tokio::spawn(async move {
        manager.sync_unscheduled().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use crate::config::SyncQueueConfig;
    use crate::db::MemoryQueueStore;
    use crate::models::{ActionKind, SyncResult};
    use crate::sync::{
        dispatch_fn, ConnectivityMonitor, DispatchError, QueueEvent, RetryConfig,
    };

    fn config() -> SyncQueueConfig {
        SyncQueueConfig {
            retry_delays_ms: vec![1_000],
            inter_action_delay_ms: 0,
            transport_retry: RetryConfig::none(),
            ..SyncQueueConfig::default()
        }
    }

    async fn manager(online: bool) -> SyncQueueManager {
        manager_over(&MemoryQueueStore::new(), online).await
    }

    async fn manager_over(store: &MemoryQueueStore, online: bool) -> SyncQueueManager {
        SyncQueueManager::new(
            config(),
            Arc::new(store.clone()),
            ConnectivityMonitor::new(online),
        )
        .await
        .expect("manager should start")
    }

    fn counting_dispatcher(calls: &Arc<AtomicU32>) -> Arc<dyn crate::sync::Dispatcher> {
        let calls = Arc::clone(calls);
        dispatch_fn(move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_drains_queued_message() {
        let manager = manager(false).await;
        let calls = Arc::new(AtomicU32::new(0));
        manager.register_dispatcher(ActionKind::SendMessage, counting_dispatcher(&calls));

        let completed = Arc::new(Mutex::new(Vec::new()));
        let _subscription = manager
            .on_queue_change({
                let completed = Arc::clone(&completed);
                move |event: &QueueEvent| {
                    if let QueueEvent::Completed(result) = event {
                        completed.lock().unwrap().push(result.clone());
                    }
                }
            })
            .await;
        let _trigger = SyncTrigger::spawn(manager.clone());

        let id = manager
            .enqueue(ActionKind::SendMessage, json!({"text": "hi"}), true)
            .await;
        assert_eq!(manager.get_queue_count().await, 1);

        manager.connectivity().set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(manager.get_queue_count().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *completed.lock().unwrap(),
            vec![SyncResult::succeeded(id, ActionKind::SendMessage)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_flaps_deliver_once() {
        let manager = manager(false).await;
        let calls = Arc::new(AtomicU32::new(0));
        manager.register_dispatcher(ActionKind::RateUser, counting_dispatcher(&calls));
        let _trigger = SyncTrigger::spawn(manager.clone());

        manager
            .enqueue(ActionKind::RateUser, json!({"stars": 5}), false)
            .await;
        for _ in 0..3 {
            manager.connectivity().set_online(true);
            tokio::time::sleep(Duration::from_millis(1)).await;
            manager.connectivity().set_online(false);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        manager.connectivity().set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_queue_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_after_background_runs_due_retries() {
        let manager = manager(true).await;
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = {
            let calls = Arc::clone(&calls);
            dispatch_fn(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DispatchError::status(503, "unavailable"))
                    } else {
                        Ok(Value::Null)
                    }
                }
            })
        };
        manager.register_dispatcher(ActionKind::CompleteTask, dispatcher);
        let trigger = SyncTrigger::spawn(manager.clone());

        let id = manager
            .enqueue(ActionKind::CompleteTask, json!({}), false)
            .await;
        manager.run_one(id).await;
        assert_eq!(manager.scheduled_retries().len(), 1);

        trigger.app_state_changed(AppLifecycle::Background);
        assert_eq!(trigger.lifecycle(), AppLifecycle::Background);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        trigger.app_state_changed(AppLifecycle::Foreground);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_queue_count().await, 0);
        assert!(manager.scheduled_retries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_retries_failure_restored_after_restart() {
        let store = MemoryQueueStore::new();
        let id = {
            let before = manager_over(&store, true).await;
            let failures = Arc::new(AtomicU32::new(0));
            before.register_dispatcher(
                ActionKind::CompleteTask,
                dispatch_fn(move |_| {
                    let failures = Arc::clone(&failures);
                    async move {
                        failures.fetch_add(1, Ordering::SeqCst);
                        Err(DispatchError::status(503, "unavailable"))
                    }
                }),
            );
            let id = before
                .enqueue(ActionKind::CompleteTask, json!({"task": "t1"}), false)
                .await;
            before.run_one(id).await;
            assert_eq!(before.scheduled_retries().len(), 1);
            id
        };

        let manager = manager_over(&store, true).await;
        let calls = Arc::new(AtomicU32::new(0));
        manager.register_dispatcher(ActionKind::CompleteTask, counting_dispatcher(&calls));
        let restored = manager.scheduled_retries();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].action_id, id);
        assert_eq!(restored[0].attempt, 2);

        let trigger = SyncTrigger::spawn(manager.clone());
        trigger.app_state_changed(AppLifecycle::Background);
        tokio::time::sleep(Duration::from_secs(120)).await;
        trigger.app_state_changed(AppLifecycle::Foreground);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_queue_count().await, 0);
        assert!(manager.scheduled_retries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_delivers_actions_without_pending_retry() {
        let manager = manager(true).await;
        let calls = Arc::new(AtomicU32::new(0));
        manager.register_dispatcher(ActionKind::AcceptTask, counting_dispatcher(&calls));
        let trigger = SyncTrigger::spawn(manager.clone());

        manager
            .enqueue(ActionKind::AcceptTask, json!({"task": "t2"}), false)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        trigger.app_state_changed(AppLifecycle::Background);
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.app_state_changed(AppLifecycle::Foreground);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_queue_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trigger_stops_reacting() {
        let manager = manager(false).await;
        let calls = Arc::new(AtomicU32::new(0));
        manager.register_dispatcher(ActionKind::SwitchMode, counting_dispatcher(&calls));
        let trigger = SyncTrigger::spawn(manager.clone());
        drop(trigger);

        manager
            .enqueue(ActionKind::SwitchMode, json!({"mode": "poster"}), false)
            .await;
        manager.connectivity().set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.get_queue_count().await, 1);
    }
}

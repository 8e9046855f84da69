//! Connectivity monitor
//!
//! Platform code reports reachability with `set_online`; consumers either
//! poll `is_online` or subscribe to transitions.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared view of network reachability
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _receiver) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record the current reachability. Returns `true` on a transition;
    /// repeated reports of the same level do not wake subscribers.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    /// Receiver woken on each transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Invoke `callback` with the new level on every transition until the
    /// returned task is aborted.
    pub fn on_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(bool) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                callback(online);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

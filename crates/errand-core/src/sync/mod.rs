//! Offline action synchronization.
//!
//! The [`SyncQueueManager`] owns the durable queue and drives delivery through
//! per-kind [`Dispatcher`]s, retrying transient failures with
//! [`execute_with_retry`] and reconciling conflicts through the
//! [`ConflictResolverRegistry`]. [`SyncTrigger`] bridges connectivity and app
//! lifecycle changes into drains.

mod conflict;
mod connectivity;
mod dispatch;
mod error;
mod executor;
mod http;
mod manager;
mod schedule;
mod trigger;

pub use conflict::{ConflictPolicy, ConflictResolverRegistry, ConflictStrategy, ResolveFn};
pub use connectivity::ConnectivityMonitor;
pub use dispatch::{dispatch_fn, DispatchRegistry, Dispatcher};
pub use error::{DispatchError, SyncError};
pub use executor::{
    backoff_delay, execute_with_retry, BackoffStrategy, RetryConfig, RetryObserver,
    RetryPredicate,
};
pub use http::{probe_reachability, HttpDispatcher};
pub use manager::{QueueEvent, QueueListener, Subscription, SyncQueueManager};
pub use schedule::{RetrySchedule, ScheduledRetry};
pub use trigger::{AppLifecycle, SyncTrigger};

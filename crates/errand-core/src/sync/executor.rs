//! Retrying request executor
//!
//! `execute_with_retry` runs an async operation and retries transient
//! failures with backoff. It keeps no state between calls, so any number of
//! callers may use it concurrently.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::DispatchError;

/// Maximum random jitter added on top of a computed delay
const MAX_JITTER_RATIO: f64 = 0.3;

/// Decides whether a failure should be retried
pub type RetryPredicate = Arc<dyn Fn(&DispatchError) -> bool + Send + Sync>;

/// Observes each retry as `(attempt, delay)`
pub type RetryObserver = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// How the delay grows between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

/// Retry policy for `execute_with_retry`
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
    pub backoff_multiplier: f64,
    /// Overrides `DispatchError::is_retryable`
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
    #[serde(skip)]
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 4_000,
            strategy: BackoffStrategy::Exponential,
            backoff_multiplier: 2.0,
            should_retry: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("strategy", &self.strategy)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryConfig {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&DispatchError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn with_on_retry(mut self, observer: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(crate::Error::Config(
                "max_delay_ms must be >= initial_delay_ms".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(crate::Error::Config(
                "backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    fn should_retry(&self, error: &DispatchError) -> bool {
        self.should_retry
            .as_ref()
            .map_or_else(|| error.is_retryable(), |predicate| predicate(error))
    }
}

/// Delay before retry number `attempt` (1-based), without jitter, capped at
/// `max_delay_ms`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let initial = config.initial_delay_ms as f64;
    let millis = match config.strategy {
        BackoffStrategy::Exponential => {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            initial * config.backoff_multiplier.powi(exponent)
        }
        BackoffStrategy::Linear => initial * f64::from(attempt),
        BackoffStrategy::Fixed => initial,
    };
    let capped = millis.min(config.max_delay_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn jittered_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = backoff_delay(config, attempt).as_millis() as f64;
    let jitter = rand::rng().random_range(0.0..=MAX_JITTER_RATIO);
    let millis = (base * (1.0 + jitter)).min(config.max_delay_ms as f64);
    Duration::from_millis(millis as u64)
}

/// Run `operation`, retrying failures that `config` classifies as transient.
///
/// The last error is returned once the operation fails with a non-retryable
/// error or `max_retries` retries have been spent.
pub async fn execute_with_retry<T, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, DispatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !config.should_retry(&error) {
            tracing::debug!(attempt, %error, "Operation failed with non-retryable error");
            return Err(error);
        }
        if attempt > config.max_retries {
            tracing::debug!(attempt, %error, "Operation failed after exhausting retries");
            return Err(error);
        }

        let delay = jittered_delay(config, attempt);
        if let Some(observer) = &config.on_retry {
            observer(attempt, delay);
        }
        tracing::warn!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            %error,
            "Retrying operation"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn config(strategy: BackoffStrategy) -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            strategy,
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn backoff_strategies() {
        let exponential = config(BackoffStrategy::Exponential);
        assert_eq!(backoff_delay(&exponential, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&exponential, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&exponential, 8), Duration::from_millis(1_000));

        let linear = config(BackoffStrategy::Linear);
        assert_eq!(backoff_delay(&linear, 3), Duration::from_millis(300));

        let fixed = config(BackoffStrategy::Fixed);
        assert_eq!(backoff_delay(&fixed, 5), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_thirty_percent_and_cap() {
        let exponential = config(BackoffStrategy::Exponential);
        for _ in 0..50 {
            let delay = jittered_delay(&exponential, 2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(260));
        }
        let capped = jittered_delay(&exponential, 10);
        assert_eq!(capped, Duration::from_millis(1_000));
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let config = RetryConfig {
            initial_delay_ms: 5_000,
            max_delay_ms: 10,
            ..RetryConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = execute_with_retry(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, DispatchError>(7)
                }
            },
            &config(BackoffStrategy::Fixed),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&retries);
        let config = config(BackoffStrategy::Fixed).with_on_retry(move |attempt, _delay| {
            observed.lock().unwrap().push(attempt);
        });

        let result = execute_with_retry(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DispatchError::status(503, "unavailable"))
                    } else {
                        Ok("done")
                    }
                }
            },
            &config,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*retries.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = execute_with_retry(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::transport("ECONNRESET", "reset"))
                }
            },
            &config(BackoffStrategy::Exponential),
        )
        .await;

        assert_eq!(result.unwrap_err().code.as_deref(), Some("ECONNRESET"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_propagate_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = execute_with_retry(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::status(422, "invalid rating"))
                }
            },
            &config(BackoffStrategy::Exponential),
        )
        .await;

        assert_eq!(result.unwrap_err().status, Some(422));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_overrides_classification() {
        let calls = Arc::new(AtomicU32::new(0));
        let config =
            config(BackoffStrategy::Fixed).with_should_retry(|error| error.status == Some(404));
        let result: Result<(), _> = execute_with_retry(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::status(404, "not yet visible"))
                }
            },
            &config,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}

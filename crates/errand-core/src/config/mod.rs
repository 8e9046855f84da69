//! Queue manager configuration.
//!
//! `SyncQueueConfig` is plain serde data so clients can embed it in their own
//! config files; every field has a default, and `validate` rejects values the
//! manager cannot honour.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::RetryConfig;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAYS_MS: [u64; 5] = [1_000, 3_000, 10_000, 30_000, 60_000];
const DEFAULT_INTER_ACTION_DELAY_MS: u64 = 100;
const DEFAULT_MAX_QUEUE_LEN: usize = 500;

/// Retry, pacing, and bounding policy for the sync queue manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncQueueConfig {
    /// Lifetime dispatch attempts before an action is evicted
    pub max_retries: u32,
    /// Delay before re-attempt N (1-based); the last entry caps later attempts
    pub retry_delays_ms: Vec<u64>,
    /// Pause between actions while draining
    pub inter_action_delay_ms: u64,
    /// Upper bound on pending actions; older low-priority entries are dropped past it
    pub max_queue_len: usize,
    /// Evict on non-retryable remote errors instead of spending the retry budget
    pub evict_on_terminal_error: bool,
    /// Transport-level retries inside a single dispatch attempt
    pub transport_retry: RetryConfig,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delays_ms: DEFAULT_RETRY_DELAYS_MS.to_vec(),
            inter_action_delay_ms: DEFAULT_INTER_ACTION_DELAY_MS,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            evict_on_terminal_error: true,
            transport_retry: RetryConfig::default(),
        }
    }
}

impl SyncQueueConfig {
    /// Load configuration from a JSON file, falling back to defaults when absent.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str::<Self>(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be > 0".to_string()));
        }
        if self.retry_delays_ms.is_empty() {
            return Err(Error::Config(
                "retry_delays_ms must contain at least one delay".to_string(),
            ));
        }
        if self.max_queue_len == 0 {
            return Err(Error::Config("max_queue_len must be > 0".to_string()));
        }
        self.transport_retry.validate()
    }

    /// Delay before the re-attempt that follows `attempts` completed attempts.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);
        let millis = self
            .retry_delays_ms
            .get(index)
            .or_else(|| self.retry_delays_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(millis)
    }

    /// Pause inserted between two actions of a drain.
    pub const fn inter_action_delay(&self) -> Duration {
        Duration::from_millis(self.inter_action_delay_ms)
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use errand_core::db::{Database, LibSqlQueueStore, QueueStore};
use errand_core::sync::{probe_reachability, Dispatcher, HttpDispatcher};
use errand_core::util::compact_text;
use errand_core::{
    ActionId, ConnectivityMonitor, Priority, QueuedAction, SyncQueueManager, SyncResult,
};
use serde::Serialize;
use serde_json::Value;

use crate::config::CliConfig;
use crate::error::CliError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct ActionListItem {
    pub id: String,
    pub kind: String,
    pub priority: String,
    pub attempts: u32,
    pub enqueued_at: i64,
    pub enqueued_at_iso: String,
    pub relative_time: String,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
    pub payload: Value,
}

/// Open the queue database with connectivity pinned to `online`.
///
/// Admin commands pass `false` so nothing is dispatched behind their back.
pub async fn open_manager(
    db_path: &Path,
    config: &CliConfig,
    online: bool,
) -> Result<SyncQueueManager, CliError> {
    let db = Database::open(db_path).await?;
    let store: Arc<dyn QueueStore> = Arc::new(LibSqlQueueStore::new(db));
    let manager =
        SyncQueueManager::new(config.queue.clone(), store, ConnectivityMonitor::new(online))
            .await?;
    if manager.is_degraded() {
        tracing::warn!("Queue database at {} could not be read", db_path.display());
    }
    Ok(manager)
}

/// Open the queue with the HTTP dispatcher registered for every kind.
///
/// Fails before touching the queue when no backend is configured or the
/// backend does not answer its health probe.
pub async fn open_backend_manager(
    db_path: &Path,
    config: &CliConfig,
) -> Result<SyncQueueManager, CliError> {
    let base_url = config
        .api_base_url()
        .ok_or(CliError::BackendNotConfigured)?;
    let dispatcher: Arc<dyn Dispatcher> =
        Arc::new(HttpDispatcher::new(base_url.clone(), config.api_token())?);

    if !probe_reachability(&base_url, PROBE_TIMEOUT).await {
        return Err(CliError::BackendUnreachable(base_url));
    }
    tracing::debug!("Backend {} is reachable", base_url);

    let manager = open_manager(db_path, config, false).await?;
    manager.register_dispatcher_for_all(&dispatcher);
    // One-shot commands deliver explicitly; restored retries would race them
    for retry in manager.scheduled_retries() {
        manager.cancel_retry(retry.action_id);
    }
    manager.connectivity().set_online(true);
    Ok(manager)
}

pub fn parse_payload(raw: Option<&str>) -> Result<Value, CliError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Value::Object(serde_json::Map::new())),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
        }
    }
}

pub fn normalize_action_identifier(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyActionId);
    }
    Ok(id.to_ascii_lowercase())
}

/// Match a full action id or a unique prefix against `queue`
pub fn resolve_action_id(query: &str, queue: &[QueuedAction]) -> Result<ActionId, CliError> {
    let query = normalize_action_identifier(query)?;
    if let Ok(id) = query.parse::<ActionId>() {
        if queue.iter().any(|action| action.id == id) {
            return Ok(id);
        }
    }

    let matching = queue
        .iter()
        .filter(|action| action.id.as_str().starts_with(&query))
        .map(|action| action.id)
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::ActionNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(*id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousActionId(format!(
                "Action ID prefix '{query}' matches multiple actions: {options}"
            )))
        }
    }
}

/// Queue contents in the order a drain would dispatch them
pub fn dispatch_order(mut queue: Vec<QueuedAction>) -> Vec<QueuedAction> {
    queue.sort_by_key(|action| action.priority);
    queue
}

pub fn short_id(id: ActionId) -> String {
    id.as_str().chars().take(13).collect()
}

pub const fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Medium => "medium",
        Priority::Low => "low",
    }
}

pub fn format_action_lines(actions: &[QueuedAction]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    actions
        .iter()
        .map(|action| {
            let short_id = short_id(action.id);
            let kind = action.kind.as_str();
            let priority = priority_label(action.priority);
            let relative_time = format_relative_time(action.enqueued_at, now_ms);
            let line = format!(
                "{short_id:<13}  {kind:<16}  {priority:<6}  attempts={}  {relative_time}",
                action.attempts
            );
            match action.last_error.as_deref() {
                Some(error) => format!("{line}  last error: {}", compact_text(error)),
                None => line,
            }
        })
        .collect()
}

pub fn action_to_list_item(action: &QueuedAction) -> ActionListItem {
    let now_ms = Utc::now().timestamp_millis();
    ActionListItem {
        id: action.id.as_str(),
        kind: action.kind.as_str().to_string(),
        priority: priority_label(action.priority).to_string(),
        attempts: action.attempts,
        enqueued_at: action.enqueued_at,
        enqueued_at_iso: format_timestamp(action.enqueued_at),
        relative_time: format_relative_time(action.enqueued_at, now_ms),
        last_attempt_at: action.last_attempt_at,
        last_error: action.last_error.clone(),
        payload: action.payload.clone(),
    }
}

pub fn format_result_line(result: &SyncResult) -> String {
    let id = result.action_id;
    let kind = result.kind.as_str();
    match result.error.as_deref() {
        None => format!("ok      {id}  {kind}"),
        Some(error) => format!("failed  {id}  {kind}  {}", compact_text(error)),
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    let diff = now_ms.saturating_sub(timestamp_ms);
    if diff < MINUTE {
        "just now".to_string()
    } else if diff < HOUR {
        format!("{}m ago", diff / MINUTE)
    } else if diff < DAY {
        format!("{}h ago", diff / HOUR)
    } else {
        format!("{}d ago", diff / DAY)
    }
}

//! Durable storage for the serialized action queue

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::QueuedAction;

use super::Database;

/// Version tag written into every serialized queue
pub const QUEUE_FORMAT_VERSION: u32 = 1;

const DEFAULT_QUEUE_KEY: &str = "sync_queue";

/// Key-value persistence primitive owned by the queue manager.
///
/// Implementations must be crash-consistent at the granularity of one `save`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Load the last saved queue blob, if any
    async fn load(&self) -> Result<Option<String>>;

    /// Replace the stored queue blob
    async fn save(&self, serialized: &str) -> Result<()>;
}

#[derive(Serialize)]
struct QueueEnvelopeRef<'a> {
    version: u32,
    actions: &'a [QueuedAction],
}

#[derive(Deserialize)]
struct QueueEnvelope {
    version: u32,
    actions: Vec<QueuedAction>,
}

/// Serialize a queue snapshot into the versioned storage format
pub fn encode_queue(actions: &[QueuedAction]) -> Result<String> {
    Ok(serde_json::to_string(&QueueEnvelopeRef {
        version: QUEUE_FORMAT_VERSION,
        actions,
    })?)
}

/// Parse a stored queue blob, rejecting unknown format versions
pub fn decode_queue(serialized: &str) -> Result<Vec<QueuedAction>> {
    let envelope: QueueEnvelope = serde_json::from_str(serialized)?;
    if envelope.version != QUEUE_FORMAT_VERSION {
        return Err(Error::InvalidInput(format!(
            "unsupported queue format version {} (expected {})",
            envelope.version, QUEUE_FORMAT_VERSION
        )));
    }
    Ok(envelope.actions)
}

/// libSQL implementation of `QueueStore`
#[derive(Clone)]
pub struct LibSqlQueueStore {
    db: Arc<Mutex<Database>>,
    key: String,
}

impl LibSqlQueueStore {
    /// Create a store over an open database using the default key
    pub fn new(db: Database) -> Self {
        Self::with_key(db, DEFAULT_QUEUE_KEY)
    }

    /// Create a store that keeps its blob under a custom key
    pub fn with_key(db: Database, key: impl Into<String>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            key: key.into(),
        }
    }
}

#[async_trait]
impl QueueStore for LibSqlQueueStore {
    async fn load(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [self.key.as_str()])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, serialized: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![self.key.as_str(), serialized, now],
            )
            .await?;
        Ok(())
    }
}

/// In-memory implementation of `QueueStore`.
///
/// Clones share the same slot, so a second manager built over a clone sees
/// what the first one saved.
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a raw blob
    pub fn with_contents(serialized: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(serialized.into()))),
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, serialized: &str) -> Result<()> {
        *self.slot.lock().await = Some(serialized.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_queue() -> Vec<QueuedAction> {
        vec![
            QueuedAction::new(ActionKind::SendMessage, json!({"text": "hi"})),
            QueuedAction::new(ActionKind::RateUser, json!({"user": "u1", "stars": 5})),
        ]
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let error = decode_queue(r#"{ "version": 99, "actions": [] }"#).unwrap_err();
        assert!(error.to_string().contains("version 99"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_queue("not json").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_libsql_store_load_empty() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlQueueStore::new(db);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_libsql_store_overwrites_blob() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlQueueStore::new(db);

        store.save("first").await.unwrap();
        store.save("second").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_libsql_store_survives_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("queue.db");
        let queue = sample_queue();

        {
            let store = LibSqlQueueStore::new(Database::open(&db_path).await.unwrap());
            store.save(&encode_queue(&queue).unwrap()).await.unwrap();
        }

        let store = LibSqlQueueStore::new(Database::open(&db_path).await.unwrap());
        let raw = store.load().await.unwrap().unwrap();
        assert_eq!(decode_queue(&raw).unwrap(), queue);
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_contents() {
        let store = MemoryQueueStore::new();
        let other = store.clone();

        store.save("blob").await.unwrap();
        assert_eq!(other.load().await.unwrap().as_deref(), Some("blob"));
    }
}

//! Persistence layer for Errand

mod connection;
mod migrations;
mod queue_store;

pub use connection::Database;
pub use queue_store::{
    decode_queue, encode_queue, LibSqlQueueStore, MemoryQueueStore, QueueStore,
    QUEUE_FORMAT_VERSION,
};

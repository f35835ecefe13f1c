//! Durable message log.
//!
//! The hub only needs two things from storage: append a message and read a
//! room's history back in append order. Ids returned by [`MessageStore::append`]
//! must grow strictly with each append; the hub uses the highest replayed id
//! as the cursor that separates persisted history from the in-memory tail.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::message::{Message, MessageId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("message store is unavailable")]
    Unavailable,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: &Message) -> Result<MessageId, StoreError>;

    /// All messages for `room_id`, oldest first.
    async fn query_by_room(&self, room_id: &str) -> Result<Vec<Message>, StoreError>;
}

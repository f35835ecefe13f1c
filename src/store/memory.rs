use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MessageStore, StoreError};
use crate::message::{Message, MessageId};

/// Process-local store. Can simulate an outage so callers can be exercised
/// against a failing backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: &Message) -> Result<MessageId, StoreError> {
        self.check()?;

        let mut messages = self.messages.lock().await;
        let id = messages.len() as MessageId + 1;
        messages.push(message.clone().with_id(id));

        Ok(id)
    }

    async fn query_by_room(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        self.check()?;

        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|message| message.room_id == room_id)
            .cloned()
            .collect())
    }
}

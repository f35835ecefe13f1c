use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::hub::Identity;

/// Position of a message in the store. Strictly increasing in append order.
pub type MessageId = i64;

/// A chat message as persisted and replayed.
///
/// The store id never leaves the process; the JSON form carries exactly the
/// room, author, content and RFC3339 creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip)]
    pub id: Option<MessageId>,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn new(room_id: &str, identity: &Identity, content: impl Into<String>) -> Self {
        Self {
            id: None,
            room_id: room_id.to_owned(),
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Stamps the id the store assigned to this message.
    pub fn with_id(self, id: MessageId) -> Self {
        Self { id: Some(id), ..self }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

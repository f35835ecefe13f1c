use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::OffsetDateTime;

use super::{MessageStore, StoreError};
use crate::message::{Message, MessageId};

type MessageRow = (i64, String, String, String, String, OffsetDateTime);

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Self::from_pool(db_pool).await
    }

    /// Wraps an existing pool, creating the `messages` table if needed.
    pub async fn from_pool(db_pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&db_pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS messages_by_room ON messages (room_id, id)")
            .execute(&db_pool)
            .await?;

        tracing::debug!("Message table ready");

        Ok(Self { db_pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, message: &Message) -> Result<MessageId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO messages (room_id,user_id,username,content,created_at) VALUES (?,?,?,?,?)",
        )
        .bind(&message.room_id)
        .bind(&message.user_id)
        .bind(&message.username)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.db_pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn query_by_room(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,room_id,user_id,username,content,created_at FROM messages WHERE room_id=? ORDER BY id",
        )
        .bind(room_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, room_id, user_id, username, content, created_at)| Message {
                id: Some(id),
                room_id,
                user_id,
                username,
                content,
                created_at,
            })
            .collect())
    }
}

//! Room-scoped broadcast hub: a registry of room tasks and the per-session loop
//! that feeds them.

mod config;
mod connection;
mod error;
mod registry;
mod room;

use std::sync::Arc;

use futures_util::{Stream, StreamExt};

pub use config::HubConfig;
pub use connection::{Connection, ConnectionId, DeliveryError, Identity, Outbox};
pub use error::HubError;
pub use registry::RoomRegistry;
pub use room::{RoomHandle, RoomStats};

use crate::message::{Message, MessageId};
use crate::store::MessageStore;

const JOIN_ATTEMPTS: usize = 3;

/// Rejects blank room ids and trims surrounding whitespace.
pub fn validate_room_id(room_id: &str) -> Result<&str, HubError> {
    let room_id = room_id.trim();
    if room_id.is_empty() {
        return Err(HubError::InvalidRoomId);
    }
    Ok(room_id)
}

#[derive(Clone)]
pub struct Hub {
    registry: Arc<RoomRegistry>,
    store: Arc<dyn MessageStore>,
}

impl Hub {
    pub fn new(config: HubConfig, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new(config)),
            store,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Creates a connection for a new session, sized per the hub config.
    pub fn connect(&self, identity: Identity) -> (Connection, Outbox) {
        Connection::channel(identity, self.registry.config().outbox_capacity)
    }

    /// Runs one client session in `room_id` until `inbound` ends or the room
    /// drops the connection.
    ///
    /// Each inbound payload is persisted first and then posted to the room.
    /// A failed write to the store is logged and the message is still
    /// delivered live; it just won't show up in persisted history.
    pub async fn serve<S>(&self, room_id: &str, connection: Connection, inbound: S) -> Result<(), HubError>
    where
        S: Stream<Item = String>,
    {
        let room_id = validate_room_id(room_id)?;
        let username = connection.identity().username.clone();

        let room = self.registry.get_or_create(room_id).await;
        let Some(room) = self.enter(room_id, room, &connection).await? else {
            tracing::debug!(room = %room_id, "Connection closed during history replay");
            return Ok(());
        };

        room.broadcast(format!("[SYSTEM] {username} has entered the {room_id}"))
            .await?;

        let outcome = self.pump(&room, &connection, inbound).await;

        room.leave(connection.id()).await?;
        connection.close();
        room.broadcast(format!("[SYSTEM] {username} has left the {room_id}"))
            .await?;

        tracing::info!(
            room = %room_id,
            connection = %connection.id(),
            user_id = %connection.identity().user_id,
            "Session ended"
        );

        outcome
    }

    /// Replays stored history. Returns the highest replayed store id, or
    /// `None` if the connection went away while replaying.
    async fn replay_persisted(&self, room_id: &str, connection: &Connection) -> Option<Option<MessageId>> {
        let history = match self.store.query_by_room(room_id).await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(room = %room_id, error = %err, "Failed to load room history");
                return Some(None);
            }
        };

        let mut cursor = None;
        for message in &history {
            let payload = match message.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(room = %room_id, error = %err, "Failed to encode history message");
                    continue;
                }
            };
            if connection.replay(payload).is_err() {
                return None;
            }
            cursor = cursor.max(message.id);
        }

        tracing::debug!(room = %room_id, replayed = history.len(), "Persisted history replayed");

        Some(cursor)
    }

    /// Replays persisted history and joins `room`. If the sweep retired the
    /// room in the meantime, joins a fresh one with the same cursor.
    ///
    /// Returns `None` if the connection went away while replaying.
    async fn enter(&self, room_id: &str, mut room: RoomHandle, connection: &Connection) -> Result<Option<RoomHandle>, HubError> {
        let mut replayed = None;
        let mut last_err = HubError::RoomClosed(room_id.to_owned());

        for _ in 0..JOIN_ATTEMPTS {
            let order = room.sequence().await;

            let cursor = match replayed {
                Some(cursor) => cursor,
                None => match self.replay_persisted(room_id, connection).await {
                    Some(cursor) => *replayed.insert(cursor),
                    None => return Ok(None),
                },
            };

            match room.join(connection.clone(), cursor).await {
                Ok(()) => return Ok(Some(room)),
                Err(err) => {
                    tracing::debug!(room = %room_id, error = %err, "Room retired during join, retrying");
                    last_err = err;
                }
            }

            drop(order);
            room = self.registry.get_or_create(room_id).await;
        }

        Err(last_err)
    }

    async fn pump<S>(&self, room: &RoomHandle, connection: &Connection, inbound: S) -> Result<(), HubError>
    where
        S: Stream<Item = String>,
    {
        let mut inbound = std::pin::pin!(inbound);

        loop {
            let content = tokio::select! {
                next = inbound.next() => match next {
                    Some(content) => content,
                    None => return Ok(()),
                },
                () = connection.closed() => return Ok(()),
            };

            if content.is_empty() {
                continue;
            }

            let order = room.sequence().await;

            let message = Message::new(room.id(), connection.identity(), content);
            let message = match self.store.append(&message).await {
                Ok(id) => message.with_id(id),
                Err(err) => {
                    tracing::warn!(
                        room = %room.id(),
                        user_id = %connection.identity().user_id,
                        error = %err,
                        "Failed to persist message, delivering anyway"
                    );
                    message
                }
            };

            room.post(message).await?;
            drop(order);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn room_ids_are_trimmed_and_non_empty() {
        assert_eq!(validate_room_id("  lobby "), Ok("lobby"));
        assert_eq!(validate_room_id("   "), Err(HubError::InvalidRoomId));
        assert_eq!(validate_room_id(""), Err(HubError::InvalidRoomId));
    }

    #[tokio::test]
    async fn enter_moves_to_a_fresh_room_after_a_sweep() {
        let hub = Hub::new(HubConfig::default(), Arc::new(MemoryStore::new()));
        let stale = hub.registry().get_or_create("lobby").await;
        assert_eq!(hub.registry().sweep(Duration::ZERO).await, 1);

        let (connection, _outbox) = hub.connect(Identity::new("u1", "alice"));
        let room = hub.enter("lobby", stale.clone(), &connection).await.unwrap().unwrap();

        assert!(!room.same_room(&stale));
        assert!(room.same_room(&hub.registry().lookup("lobby").await.unwrap()));
        assert_eq!(room.stats().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn enter_gives_up_when_the_connection_is_gone() {
        let store = Arc::new(MemoryStore::new());
        store
            .append(&Message::new("lobby", &Identity::new("u2", "bob"), "hi"))
            .await
            .unwrap();
        let hub = Hub::new(HubConfig::default(), store);
        let room = hub.registry().get_or_create("lobby").await;

        let (connection, _outbox) = hub.connect(Identity::new("u1", "alice"));
        connection.close();

        assert!(hub.enter("lobby", room.clone(), &connection).await.unwrap().is_none());
        assert_eq!(room.stats().await.unwrap().members, 0);
    }
}

//! Process-wide directory of rooms.
//!
//! This map is the only state shared between sessions. Lookups take the read
//! lock; creating or removing a room takes the write lock, so two callers can
//! never end up with different rooms for the same id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::config::HubConfig;
use super::room::RoomHandle;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    config: HubConfig,
}

impl RoomRegistry {
    pub fn new(config: HubConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Returns the live room for `room_id`, starting one if there is none.
    pub async fn get_or_create(&self, room_id: &str) -> RoomHandle {
        if let Some(room) = self.lookup(room_id).await {
            return room;
        }

        let mut rooms = self.rooms.write().await;

        // Someone may have created it between the two locks
        if let Some(room) = rooms.get(room_id).filter(|room| !room.is_closed()) {
            return room.clone();
        }

        let room = RoomHandle::spawn(room_id, &self.config);
        rooms.insert(room_id.to_owned(), room.clone());

        tracing::info!(room = %room_id, rooms = rooms.len(), "Room created");

        room
    }

    pub async fn lookup(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .filter(|room| !room.is_closed())
            .cloned()
    }

    pub async fn rooms(&self) -> Vec<RoomHandle> {
        self.rooms
            .read()
            .await
            .values()
            .filter(|room| !room.is_closed())
            .cloned()
            .collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Removes rooms that have no members and saw no activity for `idle_for`.
    ///
    /// Each room decides inside its own event order, so a join that is already
    /// queued keeps the room alive. No lock is held while rooms are asked.
    pub async fn sweep(&self, idle_for: Duration) -> usize {
        let candidates: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();

        let mut retired = Vec::new();
        for room in candidates {
            if room.retire(idle_for).await {
                retired.push(room);
            }
        }

        if retired.is_empty() {
            return 0;
        }
        self.remove_retired(&retired).await
    }

    /// Drops registry entries that still point at one of `retired`. An entry
    /// replaced by a fresh room in the meantime is left alone.
    async fn remove_retired(&self, retired: &[RoomHandle]) -> usize {
        let mut rooms = self.rooms.write().await;

        let mut removed = 0;
        for room in retired {
            if rooms.get(room.id()).is_some_and(|current| current.same_room(room)) {
                rooms.remove(room.id());
                removed += 1;
                tracing::info!(room = %room.id(), "Room removed by sweep");
            }
        }

        removed
    }

    /// Spawn the periodic idle room sweep.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.sweep_interval;
        let idle_for = registry.config.room_idle_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = registry.sweep(idle_for).await;
                if removed > 0 {
                    tracing::debug!(removed, "Idle room sweep finished");
                }
            }
        })
    }
}

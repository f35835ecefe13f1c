//! One task per room.
//!
//! All membership changes and deliveries for a room go through a single event
//! queue drained by the room's own task, so every member observes the same
//! total order of joins, leaves and broadcasts. Nothing outside the task
//! touches `members` or `recent`.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::config::HubConfig;
use super::connection::{Connection, ConnectionId};
use super::error::HubError;
use crate::message::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub id: String,
    pub members: usize,
    pub recent: usize,
}

#[derive(Debug)]
enum RoomEvent {
    Join {
        connection: Connection,
        after: Option<MessageId>,
        ack: oneshot::Sender<()>,
    },
    Leave {
        id: ConnectionId,
    },
    Broadcast {
        payload: String,
    },
    Post {
        message: Message,
    },
    Snapshot {
        reply: oneshot::Sender<RoomStats>,
    },
    Retire {
        idle_for: Duration,
        reply: oneshot::Sender<bool>,
    },
}

/// Sending side of a room's event queue.
///
/// Enqueueing waits when the queue is full, which is the backpressure a busy
/// room applies to its sessions.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: Arc<str>,
    events: mpsc::Sender<RoomEvent>,
    order: Arc<Mutex<()>>,
}

impl RoomHandle {
    /// Starts the room task and returns its handle. The task is running before
    /// anyone can enqueue.
    pub(crate) fn spawn(id: &str, config: &HubConfig) -> Self {
        let (events, rx) = mpsc::channel(config.room_queue_capacity.max(1));
        let room = Room {
            id: Arc::from(id),
            members: HashMap::new(),
            recent: VecDeque::new(),
            history_tail: config.history_tail,
            last_active: Instant::now(),
        };
        let handle = Self {
            id: Arc::clone(&room.id),
            events,
            order: Arc::new(Mutex::new(())),
        };

        tokio::spawn(room.run(rx));

        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.events.same_channel(&other.events)
    }

    /// Held across persisting a message and posting it, and across history
    /// replay plus join. Posts then reach the room in store id order, and a
    /// joiner's cursor covers exactly what it has already replayed.
    pub(crate) async fn sequence(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.order).lock_owned().await
    }

    /// Registers `connection` and replays the in-memory tail to it, skipping
    /// messages already covered by persisted history up to `after`. Returns
    /// once the member is registered.
    pub async fn join(&self, connection: Connection, after: Option<MessageId>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(RoomEvent::Join {
            connection,
            after,
            ack,
        })
        .await?;
        done.await.map_err(|_| self.closed_error())
    }

    pub async fn leave(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(RoomEvent::Leave { id }).await
    }

    /// Delivers a payload to every member without recording it.
    pub async fn broadcast(&self, payload: String) -> Result<(), HubError> {
        self.send(RoomEvent::Broadcast { payload }).await
    }

    /// Appends a chat message to the recent tail and delivers it.
    pub async fn post(&self, message: Message) -> Result<(), HubError> {
        self.send(RoomEvent::Post { message }).await
    }

    pub async fn stats(&self) -> Result<RoomStats, HubError> {
        let (reply, stats) = oneshot::channel();
        self.send(RoomEvent::Snapshot { reply }).await?;
        stats.await.map_err(|_| self.closed_error())
    }

    /// Stops the room if it has no members and has been idle for `idle_for`.
    /// A room that is already gone counts as retired.
    pub(crate) async fn retire(&self, idle_for: Duration) -> bool {
        let (reply, retired) = oneshot::channel();
        if self.send(RoomEvent::Retire { idle_for, reply }).await.is_err() {
            return true;
        }
        retired.await.unwrap_or(true)
    }

    async fn send(&self, event: RoomEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> HubError {
        HubError::RoomClosed(self.id.to_string())
    }
}

#[derive(Debug)]
struct Recent {
    id: Option<MessageId>,
    payload: String,
}

struct Room {
    id: Arc<str>,
    members: HashMap<ConnectionId, Connection>,
    recent: VecDeque<Recent>,
    history_tail: usize,
    last_active: Instant,
}

impl Room {
    async fn run(mut self, mut events: mpsc::Receiver<RoomEvent>) {
        tracing::debug!(room = %self.id, "Room started");

        while let Some(event) = events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }

        tracing::info!(room = %self.id, "Room retired");
    }

    fn handle(&mut self, event: RoomEvent) -> ControlFlow<()> {
        match event {
            RoomEvent::Join {
                connection,
                after,
                ack,
            } => {
                self.touch();
                self.join(connection, after);
                let _ = ack.send(());
            }
            RoomEvent::Leave { id } => {
                self.touch();
                self.leave(id);
            }
            RoomEvent::Broadcast { payload } => {
                self.touch();
                self.broadcast(&payload);
            }
            RoomEvent::Post { message } => {
                self.touch();
                self.post(&message);
            }
            RoomEvent::Snapshot { reply } => {
                let _ = reply.send(self.stats());
            }
            RoomEvent::Retire { idle_for, reply } => {
                let retire = self.members.is_empty() && self.last_active.elapsed() >= idle_for;
                let _ = reply.send(retire);
                if retire {
                    return ControlFlow::Break(());
                }
            }
        }

        ControlFlow::Continue(())
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn join(&mut self, connection: Connection, after: Option<MessageId>) {
        let unseen = self.recent.iter().filter(|recent| match (recent.id, after) {
            (Some(id), Some(cursor)) => id > cursor,
            _ => true,
        });

        let mut replayed = 0;
        for recent in unseen {
            if let Err(err) = connection.replay(recent.payload.clone()) {
                tracing::debug!(
                    room = %self.id,
                    connection = %connection.id(),
                    error = %err,
                    "Connection went away during replay"
                );
                return;
            }
            replayed += 1;
        }

        let id = connection.id();
        let user_id = connection.identity().user_id.clone();
        self.members.insert(id, connection);

        tracing::info!(
            room = %self.id,
            connection = %id,
            user_id = %user_id,
            replayed,
            members = self.members.len(),
            "Member joined"
        );
    }

    fn leave(&mut self, id: ConnectionId) {
        let Some(connection) = self.members.remove(&id) else {
            return;
        };
        connection.close();

        tracing::info!(
            room = %self.id,
            connection = %id,
            user_id = %connection.identity().user_id,
            members = self.members.len(),
            "Member left"
        );
    }

    fn broadcast(&mut self, payload: &str) {
        let mut failed = Vec::new();

        for (id, member) in &self.members {
            if let Err(err) = member.deliver(payload.to_owned()) {
                tracing::warn!(
                    room = %self.id,
                    connection = %id,
                    user_id = %member.identity().user_id,
                    error = %err,
                    "Delivery failed, dropping member"
                );
                failed.push(*id);
            }
        }

        for id in failed {
            self.leave(id);
        }

        tracing::trace!(room = %self.id, members = self.members.len(), "Broadcast delivered");
    }

    fn post(&mut self, message: &Message) {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(room = %self.id, error = %err, "Failed to encode message");
                return;
            }
        };

        if self.history_tail > 0 {
            if self.recent.len() == self.history_tail {
                self.recent.pop_front();
            }
            self.recent.push_back(Recent {
                id: message.id,
                payload: payload.clone(),
            });
        }

        self.broadcast(&payload);
    }

    fn stats(&self) -> RoomStats {
        RoomStats {
            id: self.id.to_string(),
            members: self.members.len(),
            recent: self.recent.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Identity, Outbox};

    fn member(name: &str, capacity: usize) -> (Connection, Outbox) {
        Connection::channel(Identity::new(name, name), capacity)
    }

    fn chat(room: &str, id: Option<MessageId>, content: &str) -> Message {
        let message = Message::new(room, &Identity::new("u0", "carol"), content);
        match id {
            Some(id) => message.with_id(id),
            None => message,
        }
    }

    fn content(payload: &str) -> String {
        serde_json::from_str::<Message>(payload).unwrap().content
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default());
        let (a, mut a_out) = member("a", 8);
        let (b, mut b_out) = member("b", 8);

        room.join(a, None).await.unwrap();
        room.join(b, None).await.unwrap();
        room.broadcast("hello".to_owned()).await.unwrap();

        assert_eq!(a_out.recv().await.as_deref(), Some("hello"));
        assert_eq!(b_out.recv().await.as_deref(), Some("hello"));
        assert_eq!(room.stats().await.unwrap().members, 2);
    }

    #[tokio::test]
    async fn left_member_gets_nothing_more() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default());
        let (a, mut a_out) = member("a", 8);
        let (b, mut b_out) = member("b", 8);
        let a_id = a.id();

        room.join(a, None).await.unwrap();
        room.join(b, None).await.unwrap();
        room.leave(a_id).await.unwrap();
        room.broadcast("after".to_owned()).await.unwrap();

        assert_eq!(b_out.recv().await.as_deref(), Some("after"));
        assert_eq!(a_out.recv().await, None);
        assert_eq!(room.stats().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn leaving_twice_is_a_no_op() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default());
        let (a, _a_out) = member("a", 8);
        let (stranger, _stranger_out) = member("s", 8);

        room.join(a.clone(), None).await.unwrap();
        room.leave(stranger.id()).await.unwrap();
        room.leave(a.id()).await.unwrap();
        room.leave(a.id()).await.unwrap();

        assert!(!stranger.is_closed());
        assert_eq!(room.stats().await.unwrap().members, 0);
    }

    #[tokio::test]
    async fn slow_member_is_evicted_without_stalling_others() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default());
        let (slow, mut slow_out) = member("slow", 1);
        let (fast, mut fast_out) = member("fast", 16);

        room.join(slow.clone(), None).await.unwrap();
        room.join(fast, None).await.unwrap();
        for n in 0..3 {
            room.broadcast(format!("m{n}")).await.unwrap();
        }

        for n in 0..3 {
            assert_eq!(fast_out.recv().await, Some(format!("m{n}")));
        }
        assert!(slow.is_closed());
        assert_eq!(slow_out.recv().await, None);
        assert_eq!(room.stats().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn recent_tail_is_bounded() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default().history_tail(2));

        for n in 1..=3 {
            room.post(chat("lobby", Some(n), &format!("m{n}"))).await.unwrap();
        }

        let (late, mut late_out) = member("late", 8);
        room.join(late, None).await.unwrap();

        assert_eq!(content(&late_out.recv().await.unwrap()), "m2");
        assert_eq!(content(&late_out.recv().await.unwrap()), "m3");
        assert_eq!(late_out.try_recv(), None);
        assert_eq!(room.stats().await.unwrap().recent, 2);
    }

    #[tokio::test]
    async fn join_skips_messages_covered_by_cursor() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default());
        room.post(chat("lobby", Some(1), "stored-1")).await.unwrap();
        room.post(chat("lobby", None, "unstored")).await.unwrap();
        room.post(chat("lobby", Some(2), "stored-2")).await.unwrap();
        room.post(chat("lobby", Some(3), "stored-3")).await.unwrap();

        let (late, mut late_out) = member("late", 8);
        room.join(late, Some(2)).await.unwrap();

        assert_eq!(content(&late_out.recv().await.unwrap()), "unstored");
        assert_eq!(content(&late_out.recv().await.unwrap()), "stored-3");
        assert_eq!(late_out.try_recv(), None);
    }

    #[tokio::test]
    async fn retire_only_when_empty_and_idle() {
        let room = RoomHandle::spawn("lobby", &HubConfig::default());
        let (a, _a_out) = member("a", 8);

        room.join(a.clone(), None).await.unwrap();
        assert!(!room.retire(Duration::ZERO).await);
        assert!(!room.retire(Duration::from_secs(3600)).await);

        room.leave(a.id()).await.unwrap();
        assert!(!room.retire(Duration::from_secs(3600)).await);
        assert!(room.retire(Duration::ZERO).await);

        let (b, _b_out) = member("b", 8);
        assert!(matches!(room.join(b, None).await, Err(HubError::RoomClosed(id)) if id == "lobby"));
    }
}

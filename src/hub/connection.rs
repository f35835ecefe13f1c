//! Delivery handle for one client's stream.
//!
//! The transport owns the socket. What the hub gets is a [`Connection`]: a
//! cloneable handle that queues payloads for the transport's writer and can
//! signal closure. The writer side drains the matching [`Outbox`].
//!
//! Two lanes feed the outbox:
//!
//! - the *replay* lane carries history and is unbounded, since history is
//!   finite and queued before the connection becomes a room member;
//! - the *live* lane carries broadcasts and is bounded, so a client that stops
//!   reading fills it up and gets evicted instead of stalling its room.
//!
//! [`Outbox::recv`] always drains replay before live.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Verified identity of a session, supplied by whoever authenticated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbox is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    identity: Arc<Identity>,
    live: mpsc::Sender<String>,
    replay: mpsc::UnboundedSender<String>,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug)]
pub struct Outbox {
    live: mpsc::Receiver<String>,
    replay: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
    closer: Arc<watch::Sender<bool>>,
}

impl Connection {
    /// Creates a connection whose live lane holds at most `capacity` payloads.
    pub fn channel(identity: Identity, capacity: usize) -> (Self, Outbox) {
        let (live_tx, live_rx) = mpsc::channel(capacity.max(1));
        let (replay_tx, replay_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        let connection = Self {
            id: ConnectionId::new(),
            identity: Arc::new(identity),
            live: live_tx,
            replay: replay_tx,
            closed: Arc::clone(&closed_tx),
        };
        let outbox = Outbox {
            live: live_rx,
            replay: replay_rx,
            closed: closed_rx,
            closer: closed_tx,
        };

        (connection, outbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queues a live payload without waiting.
    pub fn deliver(&self, payload: String) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        self.live.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queues a history payload. Replay is drained ahead of live traffic.
    pub fn replay(&self, payload: String) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        self.replay.send(payload).map_err(|_| DeliveryError::Closed)
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has been closed from either side.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Outbox {
    /// Next payload to write, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<String> {
        if *self.closed.borrow() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.closed.wait_for(|closed| *closed) => None,
            Some(payload) = self.replay.recv() => Some(payload),
            payload = self.live.recv() => payload,
        }
    }

    pub fn try_recv(&mut self) -> Option<String> {
        if *self.closed.borrow() {
            return None;
        }

        self.replay
            .try_recv()
            .ok()
            .or_else(|| self.live.try_recv().ok())
    }

    /// Closes from the transport side, e.g. after a failed or stalled write.
    pub fn close(&mut self) {
        self.closer.send_replace(true);
        self.live.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("u1", "alice")
    }

    #[tokio::test]
    async fn full_live_lane_fails_without_blocking() {
        let (connection, mut outbox) = Connection::channel(alice(), 1);

        connection.deliver("one".to_owned()).unwrap();
        assert_eq!(connection.deliver("two".to_owned()), Err(DeliveryError::Full));

        assert_eq!(outbox.recv().await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn replay_is_drained_before_live() {
        let (connection, mut outbox) = Connection::channel(alice(), 4);

        connection.deliver("live".to_owned()).unwrap();
        connection.replay("old-1".to_owned()).unwrap();
        connection.replay("old-2".to_owned()).unwrap();

        assert_eq!(outbox.recv().await.as_deref(), Some("old-1"));
        assert_eq!(outbox.recv().await.as_deref(), Some("old-2"));
        assert_eq!(outbox.recv().await.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn close_ends_outbox_and_rejects_delivery() {
        let (connection, mut outbox) = Connection::channel(alice(), 4);
        connection.deliver("pending".to_owned()).unwrap();

        connection.close();
        connection.close();

        assert!(connection.is_closed());
        assert_eq!(outbox.recv().await, None);
        assert_eq!(connection.deliver("late".to_owned()), Err(DeliveryError::Closed));
        assert_eq!(connection.replay("late".to_owned()), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn outbox_close_is_seen_by_connection() {
        let (connection, mut outbox) = Connection::channel(alice(), 4);
        let waiter = connection.clone();
        let closed = tokio::spawn(async move { waiter.closed().await });

        outbox.close();

        closed.await.unwrap();
        assert_eq!(connection.deliver("x".to_owned()), Err(DeliveryError::Closed));
    }

    #[test]
    fn clones_share_identity_and_id() {
        let (connection, _outbox) = Connection::channel(alice(), 1);
        let clone = connection.clone();

        assert_eq!(clone.id(), connection.id());
        assert_eq!(clone.identity().username, "alice");
    }
}

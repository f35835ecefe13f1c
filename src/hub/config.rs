use std::time::Duration;

/// Sizing and lifecycle knobs for rooms.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Pending events a room queues before senders wait
    pub room_queue_capacity: usize,

    /// Live payloads a connection buffers before it counts as too slow
    pub outbox_capacity: usize,

    /// Recent messages each room keeps in memory for late joiners
    pub history_tail: usize,

    /// How long an empty room lingers before the sweep removes it
    pub room_idle_timeout: Duration,

    /// Period of the idle room sweep
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            room_queue_capacity: 64,
            outbox_capacity: 256,
            history_tail: 100,
            room_idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl HubConfig {
    pub fn room_queue_capacity(mut self, capacity: usize) -> Self {
        self.room_queue_capacity = capacity.max(1);
        self
    }

    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Zero disables the in-memory tail.
    pub fn history_tail(mut self, len: usize) -> Self {
        self.history_tail = len;
        self
    }

    pub fn room_idle_timeout(mut self, timeout: Duration) -> Self {
        self.room_idle_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

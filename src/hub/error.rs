use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("room id must not be empty")]
    InvalidRoomId,
    #[error("room {0} is closed")]
    RoomClosed(String),
}

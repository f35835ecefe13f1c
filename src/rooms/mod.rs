mod history;
mod list;
mod new;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list::list_rooms).post(new::new_room))
        .route("/{room_id}/history", get(history::room_history))
        .route("/{room_id}/ws", get(ws::room_ws))
}

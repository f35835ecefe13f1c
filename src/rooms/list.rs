use axum::{debug_handler, extract::State, Json};

use crate::{hub::{Hub, Identity, RoomStats}, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(hub): State<Hub>,
    _identity: Identity,
) -> AppResult<Json<Vec<RoomStats>>> {
    let mut rooms = Vec::new();
    for room in hub.registry().rooms().await {
        // A room retired by the sweep since the listing is simply skipped
        if let Ok(stats) = room.stats().await {
            rooms.push(stats);
        }
    }
    rooms.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(Json(rooms))
}

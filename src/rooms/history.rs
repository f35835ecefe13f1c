use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{hub::{validate_room_id, Hub, Identity}, message::Message, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn room_history(
    Path(room_id): Path<String>,
    State(hub): State<Hub>,
    _identity: Identity,
) -> AppResult<Json<Vec<Message>>> {
    let room_id = validate_room_id(&room_id)?;
    let messages = hub.store().query_by_room(room_id).await?;

    Ok(Json(messages))
}

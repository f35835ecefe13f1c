use axum::{debug_handler, extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Deserialize;

use crate::{hub::{validate_room_id, Hub, Identity}, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomQuery {
    room_id: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(hub): State<Hub>,
    identity: Identity,

    Json(NewRoomQuery { room_id }): Json<NewRoomQuery>,
) -> AppResult<Response> {
    let room_id = validate_room_id(&room_id)?;
    let room = hub.registry().get_or_create(room_id).await;

    tracing::info!(room = %room_id, user_id = %identity.user_id, "Room requested");

    Ok((StatusCode::CREATED, Json(room.stats().await?)).into_response())
}

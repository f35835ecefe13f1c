pub mod config;
pub mod health;
pub mod hub;
pub mod message;
pub mod rooms;
pub mod session;
pub mod store;

use std::time::Duration;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::hub::{Hub, HubError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
    pub write_timeout: Duration,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .nest("/rooms", rooms::router())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err @ HubError::InvalidRoomId) = self.0.downcast_ref::<HubError>() {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }

        tracing::error!(error = ?self.0, "Request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(hub::HubError);
apperr_impl!(store::StoreError);
apperr_impl!(axum::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_room_id_is_a_bad_request() {
        let response = AppError::from(HubError::InvalidRoomId).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn other_errors_are_internal() {
        let response = AppError::from(HubError::RoomClosed("lobby".to_owned())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::from("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

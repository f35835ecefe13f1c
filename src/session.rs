//! Identity of the caller.
//!
//! Sessions are authenticated in front of this service; the proxy that does it
//! forwards the verified user in these headers.

use axum::{extract::FromRequestParts, http::{StatusCode, request::Parts}};

use crate::hub::Identity;

pub const USER_ID: &str = "x-user-id";
pub const USERNAME: &str = "x-username";

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        let (Some(user_id), Some(username)) = (header(USER_ID), header(USERNAME)) else {
            return Err((StatusCode::UNAUTHORIZED, "missing identity"));
        };

        Ok(Identity { user_id, username })
    }
}

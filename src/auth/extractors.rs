use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use super::{
    cookies::{read_cookie, AUTH_COOKIE_NAME, SESSION_COOKIE_NAME},
    session::ClientSession,
};
use crate::state::AppState;

/// The caller's session slot, found through the `sid` cookie. A missing or
/// malformed id yields an anonymous handle.
#[async_trait]
impl FromRequestParts<AppState> for ClientSession {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = read_cookie(&parts.headers, SESSION_COOKIE_NAME)
            .and_then(|v| Uuid::parse_str(&v).ok());
        Ok(state.sessions.client(id))
    }
}

/// Raw `user_auth` cookie value, unverified.
pub struct PersistentToken(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for PersistentToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PersistentToken(read_cookie(&parts.headers, AUTH_COOKIE_NAME)))
    }
}

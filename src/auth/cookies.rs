use axum::http::{header, HeaderMap, HeaderValue};

use crate::auth::token::IssuedToken;

/// Persistent login cookie, resumable for the token lifetime.
pub const AUTH_COOKIE_NAME: &str = "user_auth";
/// Per-client session id, dropped when the browser closes.
pub const SESSION_COOKIE_NAME: &str = "sid";
pub const COOKIE_PATH: &str = "/";

fn build(name: &str, value: &str, max_age: Option<i64>, secure: bool) -> anyhow::Result<HeaderValue> {
    let mut cookie = format!("{name}={value}; Path={COOKIE_PATH}; HttpOnly; SameSite=Lax");
    if let Some(secs) = max_age {
        cookie.push_str(&format!("; Max-Age={}", secs.max(0)));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    Ok(HeaderValue::from_str(&cookie)?)
}

pub fn auth_cookie(token: &IssuedToken, secure: bool) -> anyhow::Result<HeaderValue> {
    build(AUTH_COOKIE_NAME, &token.value, Some(token.max_age_secs), secure)
}

pub fn revoke_auth_cookie() -> anyhow::Result<HeaderValue> {
    build(AUTH_COOKIE_NAME, "", Some(0), false)
}

pub fn session_cookie(id: &str, secure: bool) -> anyhow::Result<HeaderValue> {
    build(SESSION_COOKIE_NAME, id, None, secure)
}

pub fn revoke_session_cookie() -> anyhow::Result<HeaderValue> {
    build(SESSION_COOKIE_NAME, "", Some(0), false)
}

/// Value of the named cookie from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

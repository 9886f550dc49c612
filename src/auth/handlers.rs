use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{instrument, warn};

use crate::{
    auth::{
        cookies,
        dto::{CreateUserRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
        extractors::PersistentToken,
        repo_types::{normalize_email, User, UserUpdate},
        services::{AuthService, ResumeOutcome},
        session::ClientSession,
    },
    error::AuthError,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn validate_account(email: &str, password: &str) -> Result<(), AuthError> {
    if !is_valid_email(&normalize_email(email)) {
        warn!(email = %email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    validate_password(password)
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }
    Ok(())
}

/// `Set-Cookie` headers for whatever changed on the session during this
/// request, plus a removal of `user_auth` when it has to go.
fn cookie_headers(
    session: &ClientSession,
    revoke_token: bool,
    secure: bool,
) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    if session.changed() {
        let value = match session.id() {
            Some(id) => cookies::session_cookie(&id.to_string(), secure)?,
            None => cookies::revoke_session_cookie()?,
        };
        headers.append(SET_COOKIE, value);
    }
    if revoke_token {
        headers.append(SET_COOKIE, cookies::revoke_auth_cookie()?);
    }
    Ok(headers)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/users/:id", put(update_user).delete(delete_user))
        .route("/admin/users/:id/password", post(reset_password))
        .route("/admin/users/:id/promote", post(promote_user))
}

#[instrument(skip(auth, payload))]
pub async fn register(
    State(auth): State<AuthService>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AuthError> {
    validate_account(&payload.email, &payload.password)?;
    let user = auth.register(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, auth, session, payload))]
pub async fn login(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<User>), AuthError> {
    let secure = state.config.cookie_secure;
    let (user, token) = auth
        .login(&mut session, &payload.email, &payload.password)
        .await?;
    let mut headers = cookie_headers(&session, false, secure)?;
    headers.append(SET_COOKIE, cookies::auth_cookie(&token, secure)?);
    Ok((headers, Json(user)))
}

#[instrument(skip(auth, session))]
pub async fn logout(
    State(auth): State<AuthService>,
    mut session: ClientSession,
) -> Result<(StatusCode, HeaderMap), AuthError> {
    auth.logout(&mut session).await;
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, cookies::revoke_session_cookie()?);
    headers.append(SET_COOKIE, cookies::revoke_auth_cookie()?);
    Ok((StatusCode::NO_CONTENT, headers))
}

/// Current user, resuming from `user_auth` when the session is empty.
#[instrument(skip(state, auth, session, token))]
pub async fn get_me(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = match &outcome {
        ResumeOutcome::Resumed(user) => Ok(Json(user.clone())),
        ResumeOutcome::Existing(_) => auth
            .current_user(&mut session)
            .await
            .and_then(|u| u.ok_or(AuthError::Unauthorized))
            .map(Json),
        ResumeOutcome::Anonymous { .. } => Err(AuthError::Unauthorized),
    };
    finish(&state, &session, &outcome, body)
}

/// Attach the cookie changes made while handling the request to its reply.
/// A session that started with a user and ended without one means the user
/// is gone, so the persistent token is revoked too.
fn finish<T: IntoResponse>(
    state: &AppState,
    session: &ClientSession,
    outcome: &ResumeOutcome,
    body: Result<T, AuthError>,
) -> Response {
    let user_vanished = outcome.user().is_some() && session.id().is_none();
    let revoke_token = outcome.revoke_token() || user_vanished;
    let headers = cookie_headers(session, revoke_token, state.config.cookie_secure);
    match headers {
        Ok(h) => (h, body).into_response(),
        Err(e) => e.into_response(),
    }
}

#[instrument(skip(state, auth, session, token))]
pub async fn list_users(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = auth.list_users(&mut session).await.map(Json);
    finish(&state, &session, &outcome, body)
}

#[instrument(skip(state, auth, session, token, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
    Json(payload): Json<CreateUserRequest>,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = async {
        auth.require_admin(&mut session).await?;
        validate_account(&payload.account.email, &payload.account.password)?;
        let user = auth.create_user(&mut session, payload.into()).await?;
        Ok::<_, AuthError>((StatusCode::CREATED, Json(user)))
    }
    .await;
    finish(&state, &session, &outcome, body)
}

#[instrument(skip(state, auth, session, token, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
    Path(id): Path<i64>,
    Json(payload): Json<UserUpdate>,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = async {
        auth.require_admin(&mut session).await?;
        if !is_valid_email(&normalize_email(&payload.email)) {
            return Err(AuthError::Validation("Invalid email".into()));
        }
        auth.update_user(&mut session, id, payload).await.map(Json)
    }
    .await;
    finish(&state, &session, &outcome, body)
}

#[instrument(skip(state, auth, session, token))]
pub async fn delete_user(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
    Path(id): Path<i64>,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = auth
        .delete_user(&mut session, id)
        .await
        .map(|()| StatusCode::NO_CONTENT);
    finish(&state, &session, &outcome, body)
}

#[instrument(skip(state, auth, session, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
    Path(id): Path<i64>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = async {
        auth.require_admin(&mut session).await?;
        validate_password(&payload.new_password)?;
        auth.reset_password(&mut session, id, payload.new_password)
            .await
            .map(|()| StatusCode::NO_CONTENT)
    }
    .await;
    finish(&state, &session, &outcome, body)
}

#[instrument(skip(state, auth, session, token))]
pub async fn promote_user(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    mut session: ClientSession,
    token: PersistentToken,
    Path(id): Path<i64>,
) -> Response {
    let outcome = auth.resume(&mut session, token.0.as_deref()).await;
    let body = auth.promote_to_admin(&mut session, id).await.map(Json);
    finish(&state, &session, &outcome, body)
}

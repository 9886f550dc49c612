use axum::extract::FromRef;
use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        password::{hash_password_async, verify_password_async},
        repo_types::{normalize_email, NewUser, User, UserRow, UserUpdate},
        session::ClientSession,
        token::{IssuedToken, TokenKeys},
    },
    config::AdminConfig,
    error::AuthError,
    state::AppState,
};

/// Result of trying to restore a client's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The session already held a user; the token was not looked at.
    Existing(User),
    /// The token checked out and its user still exists.
    Resumed(User),
    /// Still anonymous. `revoke_token` asks the caller to delete the
    /// presented cookie because it can never succeed.
    Anonymous { revoke_token: bool },
}

impl ResumeOutcome {
    pub fn user(&self) -> Option<&User> {
        match self {
            ResumeOutcome::Existing(u) | ResumeOutcome::Resumed(u) => Some(u),
            ResumeOutcome::Anonymous { .. } => None,
        }
    }

    pub fn revoke_token(&self) -> bool {
        matches!(self, ResumeOutcome::Anonymous { revoke_token: true })
    }
}

#[derive(Clone)]
pub struct AuthService {
    db: SqlitePool,
    keys: TokenKeys,
    admin: AdminConfig,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            TokenKeys::from_ref(state),
            state.config.admin.clone(),
        )
    }
}

impl AuthService {
    pub fn new(db: SqlitePool, keys: TokenKeys, admin: AdminConfig) -> Self {
        Self { db, keys, admin }
    }

    /// Create the reserved admin account if it is missing. Safe to run on
    /// every startup.
    #[instrument(skip(self))]
    pub async fn bootstrap_admin(&self) -> anyhow::Result<()> {
        let email = normalize_email(&self.admin.email);
        if UserRow::find_by_email(&self.db, &email).await?.is_some() {
            return Ok(());
        }
        let hash = hash_password_async(self.admin.password.clone()).await?;
        if UserRow::insert_admin_if_missing(&self.db, &email, &hash).await? {
            info!(email = %email, "bootstrap admin created");
        }
        Ok(())
    }

    #[instrument(skip(self, new), fields(email = %new.email))]
    pub async fn register(&self, new: NewUser) -> Result<User, AuthError> {
        let email = normalize_email(&new.email);
        let hash = hash_password_async(new.password).await?;
        let row = UserRow::create(
            &self.db,
            &email,
            &hash,
            &new.first_name,
            &new.last_name,
            new.twitter_handle.as_deref(),
            new.is_admin,
        )
        .await
        .map_err(|e| {
            warn!(email = %email, error = %e, "registration failed");
            AuthError::from(e)
        })?;
        info!(user_id = row.id, email = %row.email, "user registered");
        Ok(row.into())
    }

    /// `None` for unknown email and wrong password alike; both cost one
    /// Argon2 verification.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, AuthError> {
        let email = normalize_email(email);
        let row = UserRow::find_by_email(&self.db, &email).await?;
        let hash = row.as_ref().map(|r| r.password_hash.clone());
        if verify_password_async(password.to_string(), hash).await {
            Ok(row.map(User::from))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self, session, password))]
    pub async fn login(
        &self,
        session: &mut ClientSession,
        email: &str,
        password: &str,
    ) -> Result<(User, IssuedToken), AuthError> {
        let Some(user) = self.authenticate(email, password).await? else {
            warn!("login failed");
            return Err(AuthError::InvalidCredentials);
        };
        let token = self.keys.issue(&user)?;
        session.set(user.clone()).await;
        info!(
            user_id = user.id,
            name = %user.full_name(),
            token_expires_at = %token.expires_at,
            "user logged in"
        );
        Ok((user, token))
    }

    /// Restore a session from the persistent token when the session is
    /// empty. Never fails: every problem ends in `Anonymous`.
    #[instrument(skip(self, session, token))]
    pub async fn resume(&self, session: &mut ClientSession, token: Option<&str>) -> ResumeOutcome {
        if let Some(user) = session.get().await {
            return ResumeOutcome::Existing(user);
        }
        let Some(token) = token else {
            return ResumeOutcome::Anonymous { revoke_token: false };
        };

        let snapshot = match self.keys.resume(token) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "discarding session token");
                session.clear().await;
                return ResumeOutcome::Anonymous { revoke_token: true };
            }
        };

        match UserRow::find_by_id(&self.db, snapshot.id).await {
            Ok(Some(row)) => {
                let user = User::from(row);
                session.set(user.clone()).await;
                info!(user_id = user.id, "session resumed from token");
                ResumeOutcome::Resumed(user)
            }
            Ok(None) => {
                warn!(user_id = snapshot.id, "session token for missing user");
                session.clear().await;
                ResumeOutcome::Anonymous { revoke_token: true }
            }
            Err(e) => {
                error!(error = ?e, "session resume lookup failed");
                session.clear().await;
                ResumeOutcome::Anonymous { revoke_token: false }
            }
        }
    }

    /// Idempotent; the caller also revokes the cookie.
    pub async fn logout(&self, session: &mut ClientSession) {
        if let Some(user) = session.get().await {
            info!(user_id = user.id, "user logged out");
        }
        session.clear().await;
    }

    /// The session user re-read from the store. A user deleted since
    /// sign-in ends the session.
    pub async fn current_user(&self, session: &mut ClientSession) -> Result<Option<User>, AuthError> {
        let Some(cached) = session.get().await else {
            return Ok(None);
        };
        match UserRow::find_by_id(&self.db, cached.id).await? {
            Some(row) => {
                let user = User::from(row);
                session.refresh(user.clone()).await;
                Ok(Some(user))
            }
            None => {
                warn!(user_id = cached.id, "session user no longer exists");
                session.clear().await;
                Ok(None)
            }
        }
    }

    /// Admin check against the stored row, never the cached session copy.
    pub async fn require_admin(&self, session: &mut ClientSession) -> Result<User, AuthError> {
        let user = self
            .current_user(session)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !user.is_admin {
            warn!(user_id = user.id, "admin action refused");
            return Err(AuthError::Forbidden("Admin privileges required".into()));
        }
        Ok(user)
    }

    fn is_bootstrap_admin(&self, row: &UserRow) -> bool {
        row.email.eq_ignore_ascii_case(&self.admin.email)
    }

    async fn existing(&self, id: i64) -> Result<UserRow, AuthError> {
        UserRow::find_by_id(&self.db, id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("User {id} not found")))
    }

    pub async fn list_users(&self, session: &mut ClientSession) -> Result<Vec<User>, AuthError> {
        self.require_admin(session).await?;
        let rows = UserRow::list_all(&self.db).await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn create_user(&self, session: &mut ClientSession, new: NewUser) -> Result<User, AuthError> {
        let admin = self.require_admin(session).await?;
        let user = self.register(new).await?;
        info!(admin_id = admin.id, user_id = user.id, "user created by admin");
        Ok(user)
    }

    #[instrument(skip(self, session, fields))]
    pub async fn update_user(
        &self,
        session: &mut ClientSession,
        id: i64,
        mut fields: UserUpdate,
    ) -> Result<User, AuthError> {
        let admin = self.require_admin(session).await?;
        fields.email = normalize_email(&fields.email);
        let row = self.existing(id).await?;
        if self.is_bootstrap_admin(&row) && (fields.email != row.email || !fields.is_admin) {
            return Err(AuthError::Forbidden(
                "Cannot change the email or role of the main admin user".into(),
            ));
        }
        let row = UserRow::update(&self.db, id, &fields)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("User {id} not found")))?;
        info!(admin_id = admin.id, user_id = id, "user updated");
        Ok(row.into())
    }

    #[instrument(skip(self, session))]
    pub async fn delete_user(&self, session: &mut ClientSession, id: i64) -> Result<(), AuthError> {
        let admin = self.require_admin(session).await?;
        let row = self.existing(id).await?;
        if self.is_bootstrap_admin(&row) {
            warn!(admin_id = admin.id, "refused to delete main admin");
            return Err(AuthError::Forbidden("Cannot delete main admin user".into()));
        }
        UserRow::delete(&self.db, id).await?;
        info!(admin_id = admin.id, user_id = id, "user deleted");
        Ok(())
    }

    #[instrument(skip(self, session, new_password))]
    pub async fn reset_password(
        &self,
        session: &mut ClientSession,
        id: i64,
        new_password: String,
    ) -> Result<(), AuthError> {
        let admin = self.require_admin(session).await?;
        let hash = hash_password_async(new_password).await?;
        if !UserRow::set_password_hash(&self.db, id, &hash).await? {
            return Err(AuthError::NotFound(format!("User {id} not found")));
        }
        info!(admin_id = admin.id, user_id = id, "password reset");
        Ok(())
    }

    #[instrument(skip(self, session))]
    pub async fn promote_to_admin(&self, session: &mut ClientSession, id: i64) -> Result<User, AuthError> {
        let admin = self.require_admin(session).await?;
        if !UserRow::promote_to_admin(&self.db, id).await? {
            return Err(AuthError::NotFound(format!("User {id} not found")));
        }
        info!(admin_id = admin.id, user_id = id, "user promoted to admin");
        Ok(self.existing(id).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (AppState, AuthService) {
        let state = AppState::fake().await;
        let auth = AuthService::from_ref(&state);
        (state, auth)
    }

    fn new_user(email: &str, password: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: password.into(),
            first_name: "Alice".into(),
            last_name: "Liddell".into(),
            twitter_handle: Some("@alice".into()),
            is_admin: false,
        }
    }

    async fn admin_session(state: &AppState, auth: &AuthService) -> ClientSession {
        auth.bootstrap_admin().await.unwrap();
        let mut session = state.sessions.client(None);
        auth.login(&mut session, "admin@example.com", "admin-password")
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn register_is_case_insensitive_unique() {
        let (state, auth) = service().await;
        let alice = auth.register(new_user("Alice@Example.com", "Secret123")).await.unwrap();
        assert_eq!(alice.email, "alice@example.com");

        let err = auth.register(new_user("alice@example.com", "other")).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        assert_eq!(UserRow::count_by_email(&state.db, "alice@example.com").await.unwrap(), 1);

        let found = auth
            .authenticate("ALICE@example.com", "Secret123")
            .await
            .unwrap()
            .expect("authenticated");
        assert_eq!(found.id, alice.id);
        assert!(!found.is_admin);
    }

    #[tokio::test]
    async fn concurrent_registrations_yield_one_success() {
        let (state, auth) = service().await;
        let (a, b) = tokio::join!(
            auth.register(new_user("race@example.com", "Secret123")),
            auth.register(new_user("RACE@example.com", "Secret456")),
        );
        assert!(a.is_ok() ^ b.is_ok());
        let failed = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(failed, AuthError::EmailTaken));
        assert_eq!(UserRow::count_by_email(&state.db, "race@example.com").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn authenticate_failures_look_alike() {
        let (_state, auth) = service().await;
        auth.register(new_user("bob@example.com", "Secret123")).await.unwrap();
        assert!(auth.authenticate("bob@example.com", "wrong").await.unwrap().is_none());
        assert!(auth.authenticate("nobody@example.com", "Secret123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authenticated_user_serializes_without_hash() {
        let (_state, auth) = service().await;
        auth.register(new_user("carol@example.com", "Secret123")).await.unwrap();
        let user = auth.authenticate("carol@example.com", "Secret123").await.unwrap().unwrap();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password"));
    }

    #[tokio::test]
    async fn bootstrap_twice_leaves_one_admin() {
        let (state, auth) = service().await;
        auth.bootstrap_admin().await.unwrap();
        auth.bootstrap_admin().await.unwrap();
        assert_eq!(UserRow::count_by_email(&state.db, "admin@example.com").await.unwrap(), 1);
        let admin = auth
            .authenticate("Admin@Example.com", "admin-password")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.is_admin);
        assert_eq!(admin.full_name(), "Admin User");
    }

    #[tokio::test]
    async fn login_sets_session_and_issues_token() {
        let (state, auth) = service().await;
        auth.register(new_user("dan@example.com", "Secret123")).await.unwrap();
        let mut session = state.sessions.client(None);
        let (user, token) = auth.login(&mut session, "dan@example.com", "Secret123").await.unwrap();
        assert_eq!(session.get().await.map(|u| u.id), Some(user.id));
        assert!(!token.value.is_empty());
    }

    #[tokio::test]
    async fn login_failure_leaves_session_anonymous() {
        let (state, auth) = service().await;
        auth.register(new_user("erin@example.com", "Secret123")).await.unwrap();
        let mut session = state.sessions.client(None);
        let err = auth.login(&mut session, "erin@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(session.get().await.is_none());
    }

    #[tokio::test]
    async fn token_round_trip_restores_session() {
        let (state, auth) = service().await;
        auth.register(new_user("fay@example.com", "Secret123")).await.unwrap();
        let mut first = state.sessions.client(None);
        let (user, token) = auth.login(&mut first, "fay@example.com", "Secret123").await.unwrap();

        // A new connection with only the cookie.
        let mut second = state.sessions.client(None);
        let outcome = auth.resume(&mut second, Some(&token.value)).await;
        assert!(matches!(outcome, ResumeOutcome::Resumed(_)));
        assert_eq!(second.get().await.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn resume_skipped_when_already_authenticated() {
        let (state, auth) = service().await;
        auth.register(new_user("gus@example.com", "Secret123")).await.unwrap();
        let mut session = state.sessions.client(None);
        auth.login(&mut session, "gus@example.com", "Secret123").await.unwrap();
        let outcome = auth.resume(&mut session, Some("garbage")).await;
        assert!(matches!(outcome, ResumeOutcome::Existing(_)));
    }

    #[tokio::test]
    async fn resume_for_deleted_user_is_anonymous() {
        let (state, auth) = service().await;
        let user = auth.register(new_user("hal@example.com", "Secret123")).await.unwrap();
        let mut session = state.sessions.client(None);
        let (_, token) = auth.login(&mut session, "hal@example.com", "Secret123").await.unwrap();
        UserRow::delete(&state.db, user.id).await.unwrap();

        let mut fresh = state.sessions.client(None);
        let outcome = auth.resume(&mut fresh, Some(&token.value)).await;
        assert_eq!(outcome, ResumeOutcome::Anonymous { revoke_token: true });
        assert!(fresh.get().await.is_none());
    }

    #[tokio::test]
    async fn resume_with_corrupt_token_revokes() {
        let (state, auth) = service().await;
        let mut session = state.sessions.client(None);
        let outcome = auth.resume(&mut session, Some("definitely.not.jwt")).await;
        assert!(outcome.revoke_token());
        assert!(outcome.user().is_none());

        let outcome = auth.resume(&mut session, None).await;
        assert_eq!(outcome, ResumeOutcome::Anonymous { revoke_token: false });
    }

    #[tokio::test]
    async fn resume_uses_stored_row_not_snapshot() {
        let (state, auth) = service().await;
        let user = auth.register(new_user("ivy@example.com", "Secret123")).await.unwrap();
        let mut session = state.sessions.client(None);
        let (_, token) = auth.login(&mut session, "ivy@example.com", "Secret123").await.unwrap();
        UserRow::promote_to_admin(&state.db, user.id).await.unwrap();

        let mut fresh = state.sessions.client(None);
        let outcome = auth.resume(&mut fresh, Some(&token.value)).await;
        assert!(outcome.user().unwrap().is_admin);
    }

    #[tokio::test]
    async fn logout_clears_and_is_idempotent() {
        let (state, auth) = service().await;
        auth.register(new_user("jon@example.com", "Secret123")).await.unwrap();
        let mut session = state.sessions.client(None);
        auth.login(&mut session, "jon@example.com", "Secret123").await.unwrap();

        auth.logout(&mut session).await;
        assert!(session.get().await.is_none());
        auth.logout(&mut session).await;

        // No cookie after logout: resume has nothing to work with.
        let outcome = auth.resume(&mut session, None).await;
        assert!(outcome.user().is_none());
    }

    #[tokio::test]
    async fn admin_gate_rederives_from_store() {
        let (state, auth) = service().await;
        let mut admin = admin_session(&state, &auth).await;
        let kim = auth.register(new_user("kim@example.com", "Secret123")).await.unwrap();

        let mut kim_session = state.sessions.client(None);
        auth.login(&mut kim_session, "kim@example.com", "Secret123").await.unwrap();
        let err = auth.list_users(&mut kim_session).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));

        // Promotion takes effect without signing in again.
        auth.promote_to_admin(&mut admin, kim.id).await.unwrap();
        assert_eq!(auth.list_users(&mut kim_session).await.unwrap().len(), 2);

        let mut anon = state.sessions.client(None);
        assert!(matches!(auth.list_users(&mut anon).await.unwrap_err(), AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn main_admin_cannot_be_deleted_or_renamed() {
        let (state, auth) = service().await;
        let mut admin = admin_session(&state, &auth).await;
        let me = admin.get().await.unwrap();

        let err = auth.delete_user(&mut admin, me.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));

        let fields = UserUpdate {
            email: "elsewhere@example.com".into(),
            first_name: "Admin".into(),
            last_name: "User".into(),
            twitter_handle: None,
            is_admin: true,
        };
        let err = auth.update_user(&mut admin, me.id, fields).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
        assert_eq!(UserRow::count_by_email(&state.db, "admin@example.com").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn admin_manages_other_accounts() {
        let (state, auth) = service().await;
        let mut admin = admin_session(&state, &auth).await;

        let mut new = new_user("lou@example.com", "Secret123");
        new.is_admin = true;
        let lou = auth.create_user(&mut admin, new).await.unwrap();
        assert!(lou.is_admin);

        let updated = auth
            .update_user(
                &mut admin,
                lou.id,
                UserUpdate {
                    email: "LOUIS@example.com".into(),
                    first_name: "Louis".into(),
                    last_name: "L".into(),
                    twitter_handle: None,
                    is_admin: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "louis@example.com");
        assert!(!updated.is_admin);

        auth.reset_password(&mut admin, lou.id, "TempPass123!".into()).await.unwrap();
        assert!(auth.authenticate("louis@example.com", "Secret123").await.unwrap().is_none());
        assert!(auth.authenticate("louis@example.com", "TempPass123!").await.unwrap().is_some());

        auth.delete_user(&mut admin, lou.id).await.unwrap();
        let err = auth.delete_user(&mut admin, lou.id).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleted_user_session_ends() {
        let (state, auth) = service().await;
        let mut admin = admin_session(&state, &auth).await;
        let max = auth.register(new_user("max@example.com", "Secret123")).await.unwrap();
        let mut max_session = state.sessions.client(None);
        auth.login(&mut max_session, "max@example.com", "Secret123").await.unwrap();

        auth.delete_user(&mut admin, max.id).await.unwrap();
        assert!(auth.current_user(&mut max_session).await.unwrap().is_none());
        assert!(max_session.get().await.is_none());
    }

    #[tokio::test]
    async fn resume_during_storage_outage_stays_anonymous_without_revoking() {
        let (state, auth) = service().await;
        auth.register(new_user("nan@example.com", "Secret123")).await.unwrap();
        let mut first = state.sessions.client(None);
        let (_, token) = auth.login(&mut first, "nan@example.com", "Secret123").await.unwrap();

        state.db.close().await;

        let mut fresh = state.sessions.client(None);
        let outcome = auth.resume(&mut fresh, Some(&token.value)).await;
        assert_eq!(outcome, ResumeOutcome::Anonymous { revoke_token: false });
        assert!(fresh.get().await.is_none());
        assert!(fresh.id().is_none());
    }
}

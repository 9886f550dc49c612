use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::{auth::repo_types::User, config::TokenConfig, state::AppState};

/// Payload of the persistent session cookie: the public user snapshot plus
/// the standard timing claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(flatten)]
    pub user: User,
    pub iat: usize, // issued at (unix timestamp)
    pub exp: usize, // expires at (unix timestamp)
    pub iss: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid or expired session token")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// A freshly signed token and when it stops being accepted.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: OffsetDateTime,
    pub max_age_secs: i64,
}

#[derive(Clone)]
pub struct TokenKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub ttl: TimeDuration,
}

impl FromRef<AppState> for TokenKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.token)
    }
}

impl TokenKeys {
    pub fn new(cfg: &TokenConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            ttl: TimeDuration::seconds(cfg.ttl_days.saturating_mul(86_400)),
        }
    }

    pub fn issue(&self, user: &User) -> anyhow::Result<IssuedToken> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now
            .checked_add(self.ttl)
            .ok_or_else(|| anyhow::anyhow!("token lifetime {} is out of range", self.ttl))?;
        let claims = TokenClaims {
            user: user.clone(),
            iat: now.unix_timestamp() as usize,
            exp: expires_at.unix_timestamp() as usize,
            iss: self.issuer.clone(),
        };
        let value = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = user.id, "session token issued");
        Ok(IssuedToken {
            value,
            expires_at,
            max_age_secs: self.ttl.whole_seconds(),
        })
    }

    /// Decode and check signature, issuer and expiry. The snapshot is only
    /// a lookup hint; callers must re-read the user from the store.
    pub fn resume(&self, token: &str) -> Result<User, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_aud = false;
        let data = decode::<TokenClaims>(token, &self.decoding, &validation)?;
        debug!(user_id = data.claims.user.id, "session token decoded");
        Ok(data.claims.user)
    }
}

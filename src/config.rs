use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_days: i64,
}

/// Reserved administrator account created on first startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub email: String,
    pub password: String,
}

/// Limits on the in-memory session map.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub idle_minutes: u64,
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub token: TokenConfig,
    pub admin: AdminConfig,
    pub session: SessionConfig,
    pub cookie_secure: bool,
}

/// Accepted range for `TOKEN_TTL_DAYS`.
pub const TTL_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

fn parse_ttl_days(raw: Option<String>) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(7);
    };
    let days: i64 = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("TOKEN_TTL_DAYS {raw:?} is not a number: {e}"))?;
    if !TTL_DAYS_RANGE.contains(&days) {
        anyhow::bail!(
            "TOKEN_TTL_DAYS must be between {} and {}, got {days}",
            TTL_DAYS_RANGE.start(),
            TTL_DAYS_RANGE.end()
        );
    }
    Ok(days)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://truthcheck.db?mode=rwc".into());
        let token = TokenConfig {
            secret: std::env::var("TOKEN_SECRET")?,
            issuer: std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| "truthcheck".into()),
            ttl_days: parse_ttl_days(std::env::var("TOKEN_TTL_DAYS").ok())?,
        };
        let admin = AdminConfig {
            email: std::env::var("ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@example.com".into())
                .trim()
                .to_lowercase(),
            password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "change_this_password".into()),
        };
        let session = SessionConfig {
            idle_minutes: std::env::var("SESSION_IDLE_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_sessions: std::env::var("SESSION_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
        };
        let cookie_secure = std::env::var("COOKIE_SECURE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        Ok(Self {
            database_url,
            token,
            admin,
            session,
            cookie_secure,
        })
    }
}

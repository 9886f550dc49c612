use crate::auth::session::SessionStore;
use crate::config::AppConfig;
use crate::db;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = if config.database_url == "sqlite::memory:" {
            db::connect_in_memory().await?
        } else {
            db::connect(&config.database_url).await?
        };
        db::migrate(&db).await?;
        Ok(Self::from_parts(db, config))
    }

    pub fn from_parts(db: SqlitePool, config: Arc<AppConfig>) -> Self {
        let sessions = SessionStore::new(
            Duration::from_secs(config.session.idle_minutes.saturating_mul(60)),
            config.session.max_sessions,
        );
        Self {
            db,
            config,
            sessions: Arc::new(sessions),
        }
    }

    #[cfg(test)]
    pub async fn fake() -> Self {
        Self::fake_with_sessions(10_000).await
    }

    #[cfg(test)]
    pub async fn fake_with_sessions(max_sessions: usize) -> Self {
        use crate::config::{AdminConfig, SessionConfig, TokenConfig};

        let db = db::connect_in_memory().await.expect("in-memory db");
        db::migrate(&db).await.expect("migrations");

        let config = Arc::new(AppConfig {
            database_url: "sqlite::memory:".into(),
            token: TokenConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                ttl_days: 7,
            },
            admin: AdminConfig {
                email: "admin@example.com".into(),
                password: "admin-password".into(),
            },
            session: SessionConfig {
                idle_minutes: 30,
                max_sessions,
            },
            cookie_secure: false,
        });

        Self::from_parts(db, config)
    }
}

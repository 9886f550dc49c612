use crate::auth::repo_types::{UserRow, UserUpdate};
use anyhow::Context;
use sqlx::SqlitePool;

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, twitter_handle, is_admin";

/// Write failures callers must tell apart.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

fn map_unique(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepoError::EmailTaken,
        _ => RepoError::Database(e),
    }
}

impl UserRow {
    /// Find a user by email. The column collates NOCASE, so the match is
    /// case-insensitive even for rows written before normalization.
    pub async fn find_by_email(db: &SqlitePool, email: &str) -> anyhow::Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    pub async fn find_by_id(db: &SqlitePool, id: i64) -> anyhow::Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    pub async fn list_all(db: &SqlitePool) -> anyhow::Result<Vec<UserRow>> {
        let users = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(db)
        .await
        .context("list users")?;
        Ok(users)
    }

    /// Insert a new user. The UNIQUE constraint decides races between
    /// concurrent registrations of the same email.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &SqlitePool,
        email: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        twitter_handle: Option<&str>,
        is_admin: bool,
    ) -> Result<UserRow, RepoError> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, twitter_handle, is_admin)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .bind(first_name)
        .bind(last_name)
        .bind(twitter_handle)
        .bind(is_admin)
        .fetch_one(db)
        .await
        .map_err(map_unique)
    }

    /// Insert the reserved admin unless a row with that email exists.
    /// Returns whether a row was inserted.
    pub async fn insert_admin_if_missing(
        db: &SqlitePool,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, twitter_handle, is_admin)
            VALUES (?1, ?2, 'Admin', 'User', '@admin', 1)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .execute(db)
        .await
        .context("insert bootstrap admin")?;
        Ok(res.rows_affected() > 0)
    }

    /// Overwrite profile fields. `None` when the id does not exist.
    pub async fn update(
        db: &SqlitePool,
        id: i64,
        fields: &UserUpdate,
    ) -> Result<Option<UserRow>, RepoError> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET email = ?1, first_name = ?2, last_name = ?3, twitter_handle = ?4, is_admin = ?5
             WHERE id = ?6
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&fields.email)
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(fields.twitter_handle.as_deref())
        .bind(fields.is_admin)
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(map_unique)
    }

    pub async fn delete(db: &SqlitePool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn set_password_hash(
        db: &SqlitePool,
        id: i64,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(password_hash)
            .bind(id)
            .execute(db)
            .await
            .context("reset password")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn promote_to_admin(db: &SqlitePool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET is_admin = 1 WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await
            .context("promote to admin")?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
impl UserRow {
    pub async fn count_by_email(db: &SqlitePool, email: &str) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?1")
            .bind(email)
            .fetch_one(db)
            .await?;
        Ok(n)
    }
}

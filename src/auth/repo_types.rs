use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
    pub first_name: String,
    pub last_name: String,
    pub twitter_handle: Option<String>,
    pub is_admin: bool,
}

/// Public part of the user. This is what sessions hold and what the
/// persistent token carries; it has no password hash to leak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub twitter_handle: Option<String>,
    pub is_admin: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            first_name: r.first_name,
            last_name: r.last_name,
            twitter_handle: r.twitter_handle,
            is_admin: r.is_admin,
        }
    }
}

/// Fields for a new account. `email` is normalized by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub twitter_handle: Option<String>,
    pub is_admin: bool,
}

/// Profile fields an administrator may overwrite.
#[derive(Debug, Clone, Deserialize)]
pub struct UserUpdate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub twitter_handle: Option<String>,
    pub is_admin: bool,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

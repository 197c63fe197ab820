use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::auth::password::verify_password;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub image: Option<String>,        // object storage key
    pub last_login: Option<OffsetDateTime>,
    pub date_joined: OffsetDateTime,
}

impl User {
    pub fn check_password(&self, plain: &str) -> anyhow::Result<bool> {
        verify_password(plain, &self.password_hash)
    }
}

/// Insert payload; `password_hash` must already be hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

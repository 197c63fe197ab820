use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;

use super::repo_types::{NewUser, User};
use crate::error::{AppError, ValidationErrors};

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, password_hash, image, last_login, date_joined";

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique column already holds the value. `field` is `username` or `email`.
    #[error("{field} already exists")]
    Conflict { field: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                let field = match db.constraint() {
                    Some(c) if c.contains("username") => "username",
                    _ => "email",
                };
                return StoreError::Conflict { field };
            }
        }
        StoreError::Other(e.into())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            // A concurrent insert won the race after validation passed.
            StoreError::Conflict { field } => AppError::Validation(ValidationErrors::single(
                field,
                format!("A user with that {field} already exists."),
            )),
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

impl StoreError {
    /// Reports a uniqueness conflict under `key` instead of the column name.
    pub fn conflict_as(self, key: &str, message: &str) -> AppError {
        match self {
            StoreError::Conflict { .. } => AppError::Validation(ValidationErrors::single(key, message)),
            other => other.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for the user table.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User>;
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn username_exists(&self, username: &str) -> StoreResult<bool>;
    /// True when a user other than `exclude_id` holds `email`.
    async fn email_taken(&self, email: &str, exclude_id: Option<i64>) -> StoreResult<bool>;
    async fn set_password(&self, id: i64, password_hash: &str) -> StoreResult<()>;
    async fn set_email(&self, id: i64, email: &str) -> StoreResult<User>;
    async fn set_image(&self, id: i64, image: Option<&str>) -> StoreResult<User>;
    async fn record_last_login(&self, id: i64, at: OffsetDateTime) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn username_exists(&self, username: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn email_taken(&self, email: &str, exclude_id: Option<i64>) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM users
                 WHERE email = $1
                   AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(email)
        .bind(exclude_id)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn set_password(&self, id: i64, password_hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_email(&self, id: i64, email: &str) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET email = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(email)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_image(&self, id: i64, image: Option<&str>) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET image = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(image)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn record_last_login(&self, id: i64, at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

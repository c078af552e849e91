use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::User;
use crate::error::{AppError, AppResult};

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, display_name, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(user)
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, display_name, created_at, updated_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(user)
    }

    /// Insert a new account. Fails with `Conflict` when the email is taken;
    /// the unique index is the authority, not a prior existence check.
    pub async fn insert(
        pool: &SqlitePool,
        email: &str,
        password_hash: &str,
        display_name: &str,
    ) -> AppResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, email, password_hash, display_name, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false)
            {
                AppError::Conflict("An account with this email already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

        Ok(user)
    }
}

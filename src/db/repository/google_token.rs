use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::GoogleToken;
use crate::error::{AppError, AppResult};

pub struct GoogleTokenRepository;

impl GoogleTokenRepository {
    pub async fn find_by_user(pool: &SqlitePool, user_id: &str) -> AppResult<Option<GoogleToken>> {
        let token = sqlx::query_as::<_, GoogleToken>(
            r#"
            SELECT user_id, access_token, refresh_token, scope, token_type,
                   expiry_date, created_at, updated_at
            FROM google_tokens
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(token)
    }

    /// One credential per user: re-consent overwrites the stored tokens.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        scope: Option<&str>,
        token_type: Option<&str>,
        expiry_date: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO google_tokens (
                user_id, access_token, refresh_token, scope, token_type,
                expiry_date, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, google_tokens.refresh_token),
                scope = excluded.scope,
                token_type = excluded.token_type,
                expiry_date = excluded.expiry_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(scope)
        .bind(token_type)
        .bind(expiry_date)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Store a refreshed access token. Google usually omits the refresh token
    /// on refresh, so only the access token and its expiry move.
    pub async fn update_access_token(
        pool: &SqlitePool,
        user_id: &str,
        access_token: &str,
        expiry_date: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE google_tokens
            SET access_token = ?, expiry_date = ?, updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(access_token)
        .bind(expiry_date)
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One Google OAuth credential per user (overwrite on re-consent).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GoogleToken {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expiry_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

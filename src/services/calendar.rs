use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::db::models::GoogleToken;
use crate::db::GoogleTokenRepository;
use crate::error::{AppError, AppResult};
use crate::services::google::{
    CalendarEventDateTime, CalendarEventRequest, GoogleService, GoogleTokenResponse,
};
use crate::AppState;

/// Refresh the access token when it expires within this margin, so a push
/// never races the expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct PushEventParams {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: Option<String>,
}

pub struct CalendarService;

impl CalendarService {
    fn google(state: &Arc<AppState>) -> AppResult<&GoogleService> {
        state
            .google
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured("Google Calendar".to_string()))
    }

    /// Persist tokens returned by the consent flow. Overwrites any previous
    /// credential for the user.
    pub async fn store_tokens(
        state: &Arc<AppState>,
        user_id: &str,
        tokens: &GoogleTokenResponse,
    ) -> AppResult<()> {
        let expiry_date = (Utc::now() + Duration::seconds(tokens.expires_in)).naive_utc();

        GoogleTokenRepository::upsert(
            &state.db,
            user_id,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            tokens.scope.as_deref(),
            tokens.token_type.as_deref(),
            Some(expiry_date),
        )
        .await?;

        tracing::info!("Stored Google Calendar credential for user {}", user_id);
        Ok(())
    }

    /// Load the user's credential and return an access token that is valid
    /// for at least `REFRESH_MARGIN_SECS`, refreshing and persisting it
    /// first when needed.
    pub async fn ensure_valid_token(state: &Arc<AppState>, user_id: &str) -> AppResult<String> {
        let google = Self::google(state)?;

        let token = GoogleTokenRepository::find_by_user(&state.db, user_id)
            .await?
            .ok_or(AppError::NotConnected)?;

        if !Self::needs_refresh(&token) {
            return Ok(token.access_token);
        }

        let refresh_token = match &token.refresh_token {
            Some(rt) => rt,
            None => {
                // Nothing to refresh with; let the provider reject the stale
                // token so the user is prompted to reconnect.
                tracing::warn!(
                    "Google token for user {} is expiring and has no refresh token",
                    user_id
                );
                return Ok(token.access_token);
            }
        };

        let refreshed = google.refresh_access_token(refresh_token).await?;
        let expiry_date = (Utc::now() + Duration::seconds(refreshed.expires_in)).naive_utc();

        GoogleTokenRepository::update_access_token(
            &state.db,
            user_id,
            &refreshed.access_token,
            Some(expiry_date),
        )
        .await?;

        tracing::info!("Refreshed Google access token for user {}", user_id);
        Ok(refreshed.access_token)
    }

    fn needs_refresh(token: &GoogleToken) -> bool {
        match token.expiry_date {
            Some(expiry) => {
                expiry - Duration::seconds(REFRESH_MARGIN_SECS) <= Utc::now().naive_utc()
            }
            // No recorded expiry: treat the token as still usable.
            None => false,
        }
    }

    /// Push a single event to the user's primary calendar.
    pub async fn push_event(
        state: &Arc<AppState>,
        user_id: &str,
        params: PushEventParams,
    ) -> AppResult<()> {
        let google = Self::google(state)?;
        let access_token = Self::ensure_valid_token(state, user_id).await?;

        let time_zone = params.timezone.unwrap_or_else(|| "UTC".to_string());
        let request = CalendarEventRequest {
            summary: params.summary,
            description: params.description,
            location: params.location,
            start: CalendarEventDateTime {
                date_time: params.start.to_rfc3339(),
                time_zone: time_zone.clone(),
            },
            end: CalendarEventDateTime {
                date_time: params.end.to_rfc3339(),
                time_zone,
            },
        };

        google.insert_event(&access_token, &request).await?;

        tracing::info!("Pushed calendar event for user {}", user_id);
        Ok(())
    }

    /// Whether the user has a stored credential (used by the frontend to
    /// decide between "connect" and "add to calendar" buttons).
    pub async fn is_connected(state: &Arc<AppState>, user_id: &str) -> AppResult<bool> {
        Ok(GoogleTokenRepository::find_by_user(&state.db, user_id)
            .await?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn token_with_expiry(expiry: Option<NaiveDateTime>, refresh: Option<&str>) -> GoogleToken {
        let now = Utc::now().naive_utc();
        GoogleToken {
            user_id: "u1".to_string(),
            access_token: "at".to_string(),
            refresh_token: refresh.map(|s| s.to_string()),
            scope: None,
            token_type: Some("Bearer".to_string()),
            expiry_date: expiry,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_token_is_not_refreshed() {
        let expiry = (Utc::now() + Duration::hours(1)).naive_utc();
        assert!(!CalendarService::needs_refresh(&token_with_expiry(
            Some(expiry),
            Some("rt")
        )));
    }

    #[test]
    fn expiring_token_is_refreshed() {
        let expiry = (Utc::now() + Duration::seconds(30)).naive_utc();
        assert!(CalendarService::needs_refresh(&token_with_expiry(
            Some(expiry),
            Some("rt")
        )));

        let past = (Utc::now() - Duration::hours(1)).naive_utc();
        assert!(CalendarService::needs_refresh(&token_with_expiry(
            Some(past),
            Some("rt")
        )));
    }

    #[test]
    fn token_without_expiry_is_trusted() {
        assert!(!CalendarService::needs_refresh(&token_with_expiry(None, None)));
    }
}

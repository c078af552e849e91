use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::routes::auth::{AuthUser, MaybeAuthUser};
use crate::services::auth::AuthService;
use crate::services::calendar::{CalendarService, PushEventParams};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/authorize", get(authorize))
        .route("/callback", get(callback))
        .route("/add-event", post(add_event))
        .route("/status", get(get_status))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddEventRequest {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "startISO")]
    pub start_iso: String,
    #[serde(rename = "endISO")]
    pub end_iso: String,
    pub timezone: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Kick off the Google consent flow. Browser-navigated, so an anonymous
/// request is redirected to the frontend login page rather than rejected.
/// The signed state JWT carries the user through Google and back.
async fn authorize(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(user): MaybeAuthUser,
) -> Result<impl IntoResponse, AppError> {
    let frontend = state.config.server.frontend_url.trim_end_matches('/');

    let user = match user {
        Some(user) => user,
        None => return Ok(Redirect::to(&format!("{}/auth/login", frontend))),
    };

    let google = state
        .google
        .as_ref()
        .ok_or_else(|| AppError::NotConfigured("Google Calendar".to_string()))?;

    let state_jwt = AuthService::generate_calendar_oauth_state(&state, user.id.clone())?;
    let consent_url = google.consent_url(&state_jwt);

    Ok(Redirect::to(&consent_url))
}

/// Google redirects here after consent. Exchanges the code, stores the
/// credential for the user recovered from the state JWT, and sends the
/// browser back to the dashboard (or the error page when anything is off).
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    let frontend = state.config.server.frontend_url.trim_end_matches('/');
    let error_redirect = format!("{}/auth/error", frontend);

    if let Some(error) = query.error {
        tracing::warn!("Google consent denied or failed: {}", error);
        return Ok(Redirect::to(&error_redirect));
    }

    let (code, state_encoded) = match (query.code, query.state) {
        (Some(code), Some(state_encoded)) => (code, state_encoded),
        _ => {
            tracing::warn!("Calendar callback missing code or state");
            return Ok(Redirect::to(&error_redirect));
        }
    };

    let oauth_state = match AuthService::decode_calendar_oauth_state(&state, &state_encoded) {
        Ok(s) => s,
        Err(_) => return Ok(Redirect::to(&error_redirect)),
    };

    let google = state
        .google
        .as_ref()
        .ok_or_else(|| AppError::NotConfigured("Google Calendar".to_string()))?;

    let tokens = match google.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::error!("Failed to exchange Google authorization code: {:?}", e);
            return Ok(Redirect::to(&error_redirect));
        }
    };

    CalendarService::store_tokens(&state, &oauth_state.user_id, &tokens).await?;

    Ok(Redirect::to(&format!(
        "{}/dashboard?calendar=connected",
        frontend
    )))
}

/// Push one event to the caller's primary Google calendar.
async fn add_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<AddEventRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.summary.trim().is_empty() {
        return Err(AppError::BadRequest("Invalid payload".to_string()));
    }

    let start = parse_iso(&request.start_iso)?;
    let end = parse_iso(&request.end_iso)?;
    if end <= start {
        return Err(AppError::BadRequest("Invalid payload".to_string()));
    }

    CalendarService::push_event(
        &state,
        &user.id,
        PushEventParams {
            summary: request.summary,
            description: request.description,
            location: request.location,
            start,
            end,
            timezone: request.timezone,
        },
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

/// Whether the caller has connected Google Calendar.
async fn get_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let connected = CalendarService::is_connected(&state, &user.id).await?;

    Ok(Json(json!({
        "configured": state.google.is_some(),
        "connected": connected,
    })))
}

fn parse_iso(value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::BadRequest("Invalid payload".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_timestamps_parse_with_offsets() {
        assert!(parse_iso("2030-06-01T18:00:00Z").is_ok());
        assert!(parse_iso("2030-06-01T18:00:00+01:00").is_ok());
        assert!(parse_iso("June 1st").is_err());
        assert!(parse_iso("").is_err());
    }
}

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Scopes requested at consent: calendar read/write plus basic identity.
pub const CALENDAR_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/calendar.readonly",
    "openid",
    "email",
    "profile",
];

#[derive(Debug, Clone)]
pub struct GoogleService {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

// ============================================================================
// OAuth Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

// ============================================================================
// Calendar Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEventRequest {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone")]
    pub time_zone: String,
}

impl GoogleService {
    /// Build the service from configuration; `None` when the provider
    /// credentials are absent, in which case every calendar endpoint
    /// reports `NotConfigured`.
    pub fn from_config(config: &GoogleConfig) -> AppResult<Option<Self>> {
        let (client_id, client_secret) = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => return Ok(None),
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Some(Self {
            client,
            client_id,
            client_secret,
            redirect_uri: config.redirect_uri.clone(),
        }))
    }

    // ========================================================================
    // OAuth Methods
    // ========================================================================

    /// Generate the OAuth consent URL. `access_type=offline` and
    /// `prompt=consent` make Google return a refresh token.
    pub fn consent_url(&self, state: &str) -> String {
        let scope = CALENDAR_SCOPES.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state)
        )
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> AppResult<GoogleTokenResponse> {
        let response = self
            .send_with_backoff(|| {
                self.client.post(GOOGLE_TOKEN_URL).form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", self.redirect_uri.as_str()),
                ])
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Failed to exchange code: {}",
                error_text
            )));
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse token response: {}", e)))
    }

    /// Refresh an access token. Google typically omits the refresh token in
    /// this response; callers keep the stored one.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> AppResult<GoogleTokenResponse> {
        let response = self
            .send_with_backoff(|| {
                self.client.post(GOOGLE_TOKEN_URL).form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ])
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Failed to refresh token: {}",
                error_text
            )));
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse token response: {}", e)))
    }

    // ========================================================================
    // Calendar Methods
    // ========================================================================

    /// Insert one event into the user's primary calendar.
    pub async fn insert_event(
        &self,
        access_token: &str,
        event: &CalendarEventRequest,
    ) -> AppResult<()> {
        let response = self
            .send_with_backoff(|| {
                self.client
                    .post(format!(
                        "{}/calendars/primary/events",
                        GOOGLE_CALENDAR_API_URL
                    ))
                    .header("Authorization", format!("Bearer {}", access_token))
                    .json(event)
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Failed to insert calendar event: {}",
                error_text
            )));
        }

        Ok(())
    }

    /// Send a request with simple retries on transient transport errors.
    async fn send_with_backoff<F>(&self, build: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        const MAX_ATTEMPTS: u32 = 3;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < MAX_ATTEMPTS && (e.is_timeout() || e.is_connect()) => {
                    let wait = std::time::Duration::from_millis(200 * 2u64.pow(attempt));
                    tracing::warn!(
                        "Google request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        wait,
                        e
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(AppError::Request(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GoogleConfig;

    fn configured() -> GoogleService {
        GoogleService::from_config(&GoogleConfig {
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            redirect_uri: "http://localhost:8080/api/calendar/callback".to_string(),
        })
        .unwrap()
        .unwrap()
    }

    #[test]
    fn missing_credentials_yield_no_service() {
        let service = GoogleService::from_config(&GoogleConfig {
            client_id: Some("client-id".to_string()),
            client_secret: None,
            redirect_uri: "http://localhost:8080/api/calendar/callback".to_string(),
        })
        .unwrap();
        assert!(service.is_none());
    }

    #[test]
    fn consent_url_is_well_formed() {
        let url = configured().consent_url("state-token");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=state-token"));
        // Scopes are space-joined, then percent-encoded.
        assert!(url.contains(
            "calendar.events%20https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fcalendar.readonly"
        ));

        // The URL must parse back cleanly.
        assert!(url::Url::parse(&url).is_ok());
    }
}

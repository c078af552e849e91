use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already registered for this event")]
    AlreadyRegistered,

    #[error("Event is fully booked")]
    EventFull,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Stripe API error: {0}")]
    Stripe(String),

    #[error("Google API error: {0}")]
    GoogleApi(String),

    #[error("{0} integration not configured")]
    NotConfigured(String),

    #[error("Google Calendar not connected")]
    NotConnected,

    #[error("Payment succeeded but booking update failed: {0}")]
    Reconciliation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::AlreadyRegistered => (
                StatusCode::CONFLICT,
                "ALREADY_REGISTERED",
                self.to_string(),
            ),
            AppError::EventFull => (StatusCode::CONFLICT, "EVENT_FULL", self.to_string()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                self.to_string(),
            ),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "Invalid or expired token".to_string(),
                )
            }
            AppError::Request(e) => {
                tracing::error!("HTTP request error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_REQUEST_FAILED",
                    "Failed to communicate with external service".to_string(),
                )
            }
            AppError::Stripe(msg) => {
                tracing::error!("Stripe API error: {}", msg);
                (StatusCode::BAD_GATEWAY, "STRIPE_API_ERROR", msg.clone())
            }
            AppError::GoogleApi(msg) => {
                tracing::error!("Google API error: {}", msg);
                (StatusCode::BAD_GATEWAY, "GOOGLE_API_ERROR", msg.clone())
            }
            AppError::NotConfigured(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONFIGURED",
                self.to_string(),
            ),
            AppError::NotConnected => (
                StatusCode::UNAUTHORIZED,
                "CALENDAR_NOT_CONNECTED",
                self.to_string(),
            ),
            AppError::Reconciliation(msg) => {
                // A payment was collected without a matching booking update.
                // Keep the full detail in the log so the case can be replayed.
                tracing::error!("RECONCILIATION REQUIRED: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "RECONCILIATION_ERROR",
                    "Payment was received but the booking could not be finalized".to_string(),
                )
            }
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_status_for_booking_errors() {
        let resp = AppError::AlreadyRegistered.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::EventFull.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn calendar_errors_map_to_expected_statuses() {
        let resp = AppError::NotConnected.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = AppError::NotConfigured("Google Calendar".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn reconciliation_is_a_server_error() {
        let resp = AppError::Reconciliation("pi_123".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

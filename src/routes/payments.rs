use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::routes::auth::AuthUser;
use crate::services::payments::PaymentService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkout", post(start_checkout))
        .route("/verify", post(verify_payment))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub event_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub payment_intent_id: String,
}

/// Start a paid registration directly (the checkout page calls this when the
/// user lands on it without going through the attend button).
async fn start_checkout(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let client_secret =
        PaymentService::start_checkout(&state, &request.event_id, &user.id).await?;

    Ok(Json(json!({ "client_secret": client_secret })))
}

/// Called by the checkout success page with the PaymentIntent id from the
/// return redirect. Safe to call repeatedly; the webhook may already have
/// confirmed the booking.
async fn verify_payment(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let verified = PaymentService::verify(&state, &request.payment_intent_id).await?;

    tracing::debug!(
        "Payment verification for intent {} by user {}: {}",
        request.payment_intent_id,
        user.id,
        verified
    );

    Ok(Json(json!({ "verified": verified })))
}

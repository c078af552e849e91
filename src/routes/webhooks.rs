use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use chrono::Utc;

use crate::error::AppError;
use crate::services::payments::{PaymentService, StripeEvent};
use crate::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Stripe's asynchronous path to payment resolution. Runs the same booking
/// finalization as the return-redirect verification, so whichever arrives
/// first wins and the other becomes a no-op.
async fn handle_stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, String), AppError> {
    let webhook_secret = state
        .config
        .stripe
        .webhook_secret
        .as_ref()
        .ok_or_else(|| AppError::NotConfigured("Stripe webhooks".to_string()))?;

    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    PaymentService::verify_webhook_signature(
        webhook_secret,
        signature,
        &body,
        Utc::now().timestamp(),
    )?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

    tracing::info!(
        "Received Stripe webhook: id={}, type={}",
        event.id,
        event.event_type
    );

    // Returning an error here makes Stripe redeliver, which is exactly what a
    // reconciliation failure needs.
    PaymentService::handle_webhook_event(&state, event).await?;

    Ok((StatusCode::OK, "OK".to_string()))
}

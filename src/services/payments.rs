use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::models::{BOOKING_STATUS_PENDING, PAYMENT_STATUS_PENDING};
use crate::db::repository::booking::BookingInsert;
use crate::db::{BookingRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::services::stripe::{to_minor_units, PaymentIntent, StripeService};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Reject webhook deliveries whose signature timestamp is further than this
/// from the current time.
const SIGNATURE_TOLERANCE_SECS: i64 = 600;

pub const EVENT_PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

// ============================================================================
// Webhook payload types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

pub struct PaymentService;

impl PaymentService {
    fn stripe(state: &Arc<AppState>) -> AppResult<&StripeService> {
        state
            .stripe
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured("Stripe".to_string()))
    }

    /// Start a paid registration: validate the event and the caller, create
    /// a PaymentIntent carrying (event, user) metadata, and insert the
    /// pending booking that holds the seat until payment resolves.
    ///
    /// Returns the intent's client secret for the frontend to complete the
    /// payment out-of-band.
    pub async fn start_checkout(
        state: &Arc<AppState>,
        event_id: &str,
        user_id: &str,
    ) -> AppResult<String> {
        let stripe = Self::stripe(state)?;

        let event = EventRepository::find_by_id(&state.db, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        if event.is_free {
            return Err(AppError::BadRequest(
                "This event is free; register directly".to_string(),
            ));
        }

        if BookingRepository::find_by_event_and_user(&state.db, event_id, user_id)
            .await?
            .is_some()
        {
            return Err(AppError::AlreadyRegistered);
        }

        let amount = to_minor_units(event.price);
        let intent = stripe
            .create_payment_intent(
                amount,
                &state.config.stripe.currency,
                event_id,
                user_id,
                &event.title,
                &event.description,
            )
            .await?;

        let inserted = BookingRepository::insert_guarded(
            &state.db,
            event_id,
            user_id,
            BOOKING_STATUS_PENDING,
            PAYMENT_STATUS_PENDING,
            Some(&intent.id),
        )
        .await?;

        match inserted {
            BookingInsert::Inserted(_) => {}
            BookingInsert::Duplicate => {
                // Lost a race with another registration from the same user;
                // the created intent will expire unpaid.
                tracing::warn!(
                    "PaymentIntent {} orphaned: user {} already booked event {}",
                    intent.id,
                    user_id,
                    event_id
                );
                return Err(AppError::AlreadyRegistered);
            }
            BookingInsert::Full => {
                tracing::warn!(
                    "PaymentIntent {} orphaned: event {} filled up",
                    intent.id,
                    event_id
                );
                return Err(AppError::EventFull);
            }
        }

        tracing::info!(
            "Started checkout for event {} by user {}: intent {}, amount {} {}",
            event_id,
            user_id,
            intent.id,
            amount,
            state.config.stripe.currency
        );

        intent
            .client_secret
            .ok_or_else(|| AppError::Stripe("PaymentIntent has no client secret".to_string()))
    }

    /// Check a PaymentIntent with Stripe and, when it succeeded, finalize
    /// the matching booking. Returns whether the payment was verified.
    pub async fn verify(state: &Arc<AppState>, payment_intent_id: &str) -> AppResult<bool> {
        let stripe = Self::stripe(state)?;

        let intent = stripe.retrieve_payment_intent(payment_intent_id).await?;

        if !intent.is_succeeded() {
            tracing::debug!(
                "PaymentIntent {} not succeeded yet (status: {})",
                intent.id,
                intent.status
            );
            return Ok(false);
        }

        Self::finalize_succeeded(state, &intent).await?;
        Ok(true)
    }

    /// Apply a succeeded payment to the local booking. Idempotent: replays
    /// re-apply the same terminal values to the same row. Every failure past
    /// this point means money was taken without a confirmed booking, so all
    /// errors surface as `Reconciliation` and are never swallowed.
    pub async fn finalize_succeeded(
        state: &Arc<AppState>,
        intent: &PaymentIntent,
    ) -> AppResult<()> {
        let rows = BookingRepository::confirm_by_payment_intent(&state.db, &intent.id)
            .await
            .map_err(|e| {
                AppError::Reconciliation(format!(
                    "failed to confirm booking for intent {}: {}",
                    intent.id, e
                ))
            })?;

        if rows > 0 {
            tracing::info!("Confirmed booking for PaymentIntent {}", intent.id);
            return Ok(());
        }

        // The pending row is gone (cancelled mid-payment, or never written).
        // Rebuild the booking from the metadata Stripe echoed back.
        let event_id = intent.metadata.get("event_id");
        let user_id = intent.metadata.get("user_id");
        let (event_id, user_id) = match (event_id, user_id) {
            (Some(e), Some(u)) => (e, u),
            _ => {
                return Err(AppError::Reconciliation(format!(
                    "no booking references intent {} and its metadata is incomplete",
                    intent.id
                )))
            }
        };

        tracing::warn!(
            "No pending booking for succeeded intent {}; recovering from metadata (event {}, user {})",
            intent.id,
            event_id,
            user_id
        );

        BookingRepository::upsert_confirmed(&state.db, event_id, user_id, &intent.id)
            .await
            .map_err(|e| {
                AppError::Reconciliation(format!(
                    "failed to recover booking for intent {}: {}",
                    intent.id, e
                ))
            })?;

        Ok(())
    }

    // ========================================================================
    // Webhook handling
    // ========================================================================

    /// Verify a `Stripe-Signature` header against the raw body.
    ///
    /// The header carries `t=<unix ts>,v1=<hex hmac>[,v1=...]`; the signed
    /// payload is `"{t}.{body}"` and the timestamp must be within the
    /// tolerance window.
    pub fn verify_webhook_signature(
        webhook_secret: &str,
        signature_header: &str,
        body: &[u8],
        now_ts: i64,
    ) -> AppResult<()> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::BadRequest("Invalid signature format".to_string()))?;
        if signatures.is_empty() {
            return Err(AppError::BadRequest("Invalid signature format".to_string()));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid signature timestamp".to_string()))?;
        if (now_ts - ts).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(AppError::BadRequest("Signature too old".to_string()));
        }

        let mut signed_payload = Vec::new();
        signed_payload.extend_from_slice(timestamp.as_bytes());
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(body);

        for candidate in signatures {
            let expected = match hex::decode(candidate) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };

            let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
                .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
            mac.update(&signed_payload);

            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        Err(AppError::Unauthorized)
    }

    /// Dispatch a verified webhook event. Only `payment_intent.succeeded`
    /// carries work; everything else is acknowledged and ignored.
    pub async fn handle_webhook_event(state: &Arc<AppState>, event: StripeEvent) -> AppResult<()> {
        match event.event_type.as_str() {
            EVENT_PAYMENT_INTENT_SUCCEEDED => {
                let intent: PaymentIntent = serde_json::from_value(event.data.object)
                    .map_err(|e| AppError::BadRequest(format!("Invalid event object: {}", e)))?;

                tracing::info!(
                    "Webhook {}: PaymentIntent {} succeeded",
                    event.id,
                    intent.id
                );
                Self::finalize_succeeded(state, &intent).await
            }
            other => {
                tracing::debug!("Ignoring webhook {} of type {}", event.id, other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(body);
        let digest = hex::encode(mac.finalize().into_bytes());
        format!("t={},v1={}", timestamp, digest)
    }

    #[test]
    fn valid_signature_is_accepted() {
        let secret = "whsec_test";
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now().timestamp();
        let header = sign(secret, now, body);

        assert!(PaymentService::verify_webhook_signature(secret, &header, body, now).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = "whsec_test";
        let now = Utc::now().timestamp();
        let header = sign(secret, now, br#"{"id":"evt_1"}"#);

        let err =
            PaymentService::verify_webhook_signature(secret, &header, br#"{"id":"evt_2"}"#, now)
                .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let secret = "whsec_test";
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now().timestamp();
        let header = sign(secret, now - 3600, body);

        let err = PaymentService::verify_webhook_signature(secret, &header, body, now).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = PaymentService::verify_webhook_signature(
            "whsec_test",
            "not-a-signature",
            b"{}",
            Utc::now().timestamp(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}

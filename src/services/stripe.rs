use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";

/// Metadata description values are capped by Stripe; long event descriptions
/// are truncated before attaching them to a PaymentIntent.
pub const METADATA_DESCRIPTION_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct StripeService {
    client: Client,
    secret_key: String,
}

// ============================================================================
// PaymentIntent Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub const PAYMENT_INTENT_SUCCEEDED: &str = "succeeded";

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == PAYMENT_INTENT_SUCCEEDED
    }
}

/// Convert a major-unit price into the minor units Stripe expects
/// (e.g. 25.00 -> 2500).
pub fn to_minor_units(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// Truncate a metadata value to Stripe's limit without splitting a
/// multi-byte character.
pub fn truncate_metadata(value: &str, limit: usize) -> String {
    if value.len() <= limit {
        return value.to_string();
    }
    let mut end = limit;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

impl StripeService {
    pub fn new(secret_key: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self { client, secret_key })
    }

    /// Create a PaymentIntent for an event registration. The metadata links
    /// the charge back to the (event, user) pair so a lost local row can be
    /// reconstructed from what Stripe echoes back.
    pub async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        event_id: &str,
        user_id: &str,
        event_title: &str,
        event_description: &str,
    ) -> AppResult<PaymentIntent> {
        let amount_str = amount.to_string();
        let description = truncate_metadata(event_description, METADATA_DESCRIPTION_LIMIT);

        let params: Vec<(&str, &str)> = vec![
            ("amount", amount_str.as_str()),
            ("currency", currency),
            ("metadata[event_id]", event_id),
            ("metadata[user_id]", user_id),
            ("metadata[event_title]", event_title),
            ("metadata[event_description]", description.as_str()),
        ];

        let response = self
            .send_with_backoff(|| {
                self.client
                    .post(format!("{}/payment_intents", STRIPE_API_URL))
                    .basic_auth(&self.secret_key, None::<&str>)
                    .form(&params)
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Stripe(format!(
                "Failed to create PaymentIntent: {}",
                error_text
            )));
        }

        response
            .json::<PaymentIntent>()
            .await
            .map_err(|e| AppError::Stripe(format!("Failed to parse PaymentIntent: {}", e)))
    }

    /// Retrieve a PaymentIntent by id.
    pub async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> AppResult<PaymentIntent> {
        let response = self
            .send_with_backoff(|| {
                self.client
                    .get(format!(
                        "{}/payment_intents/{}",
                        STRIPE_API_URL, payment_intent_id
                    ))
                    .basic_auth(&self.secret_key, None::<&str>)
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Stripe(format!(
                "Failed to retrieve PaymentIntent {}: {}",
                payment_intent_id, error_text
            )));
        }

        response
            .json::<PaymentIntent>()
            .await
            .map_err(|e| AppError::Stripe(format!("Failed to parse PaymentIntent: {}", e)))
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
                        "Stripe request failed (attempt {}/{}), retrying in {:?}: {}",
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

    #[test]
    fn price_converts_to_minor_units() {
        assert_eq!(to_minor_units(25.0), 2500);
        assert_eq!(to_minor_units(0.0), 0);
        assert_eq!(to_minor_units(9.99), 999);
        // Floating point representation must not lose a penny.
        assert_eq!(to_minor_units(19.99), 1999);
        assert_eq!(to_minor_units(0.1), 10);
    }

    #[test]
    fn metadata_truncation_respects_char_boundaries() {
        let short = "hello";
        assert_eq!(truncate_metadata(short, 500), "hello");

        let long = "x".repeat(600);
        assert_eq!(truncate_metadata(&long, 500).len(), 500);

        // 'é' is two bytes; a cut in the middle must back off.
        let accented = format!("{}é", "a".repeat(499));
        let truncated = truncate_metadata(&accented, 500);
        assert_eq!(truncated, "a".repeat(499));
    }

    #[test]
    fn succeeded_status_is_terminal() {
        let intent = PaymentIntent {
            id: "pi_1".to_string(),
            client_secret: Some("pi_1_secret".to_string()),
            status: "succeeded".to_string(),
            amount: 2500,
            currency: "gbp".to_string(),
            metadata: HashMap::new(),
        };
        assert!(intent.is_succeeded());

        let pending = PaymentIntent {
            status: "requires_payment_method".to_string(),
            ..intent
        };
        assert!(!pending.is_succeeded());
    }
}

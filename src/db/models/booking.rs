use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Booking lifecycle: free registrations are inserted directly as
/// `confirmed`/`completed`; paid registrations are inserted as
/// `pending`/`pending` with the PaymentIntent id set, and flip to
/// `confirmed`/`completed` once Stripe reports the intent succeeded.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub status: String,
    pub payment_status: String,
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub const BOOKING_STATUS_PENDING: &str = "pending";
pub const BOOKING_STATUS_CONFIRMED: &str = "confirmed";

pub const PAYMENT_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_COMPLETED: &str = "completed";

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BOOKING_STATUS_CONFIRMED
    }
}

/// A booking joined with the summary of its event, as returned by the
/// dashboard listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingWithEvent {
    pub id: String,
    pub event_id: String,
    pub status: String,
    pub payment_status: String,
    pub created_at: NaiveDateTime,
    pub event_title: String,
    pub event_location: String,
    pub event_date: NaiveDateTime,
    pub event_end_date: Option<NaiveDateTime>,
    pub event_price: f64,
    pub event_is_free: bool,
}

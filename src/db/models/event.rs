use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub organizer_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    /// "in-person" or "online".
    pub event_type: String,
    pub date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    /// Ticket price in major currency units (e.g. pounds). Zero means free.
    pub price: f64,
    /// Derived from price on every write; kept as a column so list queries
    /// can filter without touching price arithmetic.
    pub is_free: bool,
    pub max_attendees: Option<i64>,
    pub image_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Payload for creating or replacing an event. `is_free` is not accepted
/// from callers; it is recomputed from `price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub title: String,
    pub description: String,
    pub location: String,
    pub event_type: String,
    pub date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub price: f64,
    pub max_attendees: Option<i64>,
    pub image_url: Option<String>,
}

pub const EVENT_TYPE_IN_PERSON: &str = "in-person";
pub const EVENT_TYPE_ONLINE: &str = "online";

impl EventInput {
    pub fn is_free(&self) -> bool {
        self.price == 0.0
    }
}

use std::sync::Arc;

use crate::db::models::{Booking, BOOKING_STATUS_CONFIRMED, PAYMENT_STATUS_COMPLETED};
use crate::db::repository::booking::BookingInsert;
use crate::db::{BookingRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::services::payments::PaymentService;
use crate::AppState;

/// What an attend request produced: free events register immediately, paid
/// events hand back a client secret for the frontend to complete payment.
#[derive(Debug)]
pub enum AttendOutcome {
    Confirmed(Booking),
    PaymentRequired { client_secret: String },
}

pub struct BookingService;

impl BookingService {
    /// Register the user for an event. Free and paid paths converge on the
    /// same bookings table: free inserts a confirmed row directly, paid
    /// inserts a pending row via the payment bridge.
    pub async fn attend(
        state: &Arc<AppState>,
        event_id: &str,
        user_id: &str,
    ) -> AppResult<AttendOutcome> {
        let event = EventRepository::find_by_id(&state.db, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        if !event.is_free {
            let client_secret = PaymentService::start_checkout(state, event_id, user_id).await?;
            return Ok(AttendOutcome::PaymentRequired { client_secret });
        }

        let inserted = BookingRepository::insert_guarded(
            &state.db,
            event_id,
            user_id,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await?;

        match inserted {
            BookingInsert::Inserted(booking) => {
                tracing::info!("User {} registered for free event {}", user_id, event_id);
                Ok(AttendOutcome::Confirmed(booking))
            }
            BookingInsert::Duplicate => Err(AppError::AlreadyRegistered),
            BookingInsert::Full => Err(AppError::EventFull),
        }
    }

    /// Cancel the user's booking. Idempotent: cancelling an absent booking
    /// reports `false` instead of erroring.
    pub async fn cancel(state: &Arc<AppState>, event_id: &str, user_id: &str) -> AppResult<bool> {
        let removed =
            BookingRepository::delete_by_event_and_user(&state.db, event_id, user_id).await?;

        if removed {
            tracing::info!("User {} cancelled booking for event {}", user_id, event_id);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;
    use crate::config::Config;
    use crate::db::models::{EventInput, EVENT_TYPE_IN_PERSON, EVENT_TYPE_ONLINE};
    use crate::db::UserRepository;

    async fn test_state() -> Arc<AppState> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        Arc::new(AppState {
            db: pool,
            config: Config::default(),
            stripe: None,
            google: None,
        })
    }

    async fn seed_user(state: &Arc<AppState>, email: &str) -> String {
        UserRepository::insert(&state.db, email, "hash", "Test User")
            .await
            .unwrap()
            .id
    }

    async fn seed_event(state: &Arc<AppState>, organizer: &str, price: f64) -> String {
        let input = EventInput {
            title: "Workshop".to_string(),
            description: "A workshop".to_string(),
            location: "Online".to_string(),
            event_type: if price > 0.0 {
                EVENT_TYPE_ONLINE.to_string()
            } else {
                EVENT_TYPE_IN_PERSON.to_string()
            },
            date: chrono::Utc::now().naive_utc() + chrono::Duration::days(3),
            end_date: None,
            price,
            max_attendees: None,
            image_url: None,
        };
        EventRepository::insert(&state.db, organizer, &input)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn free_attend_confirms_then_rejects_duplicate() {
        let state = test_state().await;
        let organizer = seed_user(&state, "org@example.com").await;
        let attendee = seed_user(&state, "user@example.com").await;
        let event = seed_event(&state, &organizer, 0.0).await;

        let outcome = BookingService::attend(&state, &event, &attendee).await.unwrap();
        match outcome {
            AttendOutcome::Confirmed(booking) => {
                assert_eq!(booking.status, BOOKING_STATUS_CONFIRMED);
                assert_eq!(booking.payment_status, PAYMENT_STATUS_COMPLETED);
            }
            other => panic!("expected confirmed booking, got {:?}", other),
        }

        let err = BookingService::attend(&state, &event, &attendee).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn attend_unknown_event_is_not_found() {
        let state = test_state().await;
        let attendee = seed_user(&state, "user@example.com").await;

        let err = BookingService::attend(&state, "missing", &attendee).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn paid_attend_without_stripe_reports_not_configured() {
        let state = test_state().await;
        let organizer = seed_user(&state, "org@example.com").await;
        let attendee = seed_user(&state, "user@example.com").await;
        let event = seed_event(&state, &organizer, 25.0).await;

        let err = BookingService::attend(&state, &event, &attendee).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_allows_rebooking() {
        let state = test_state().await;
        let organizer = seed_user(&state, "org@example.com").await;
        let attendee = seed_user(&state, "user@example.com").await;
        let event = seed_event(&state, &organizer, 0.0).await;

        BookingService::attend(&state, &event, &attendee).await.unwrap();

        assert!(BookingService::cancel(&state, &event, &attendee).await.unwrap());
        assert!(!BookingService::cancel(&state, &event, &attendee).await.unwrap());

        // A fresh registration succeeds after cancellation.
        let outcome = BookingService::attend(&state, &event, &attendee).await.unwrap();
        assert!(matches!(outcome, AttendOutcome::Confirmed(_)));
    }
}

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    Booking, BookingWithEvent, BOOKING_STATUS_CONFIRMED, PAYMENT_STATUS_COMPLETED,
};
use crate::error::{AppError, AppResult};

const BOOKING_COLUMNS: &str = r#"
    id, event_id, user_id, status, payment_status,
    stripe_payment_intent_id, created_at, updated_at
"#;

/// Result of the guarded booking insert.
#[derive(Debug)]
pub enum BookingInsert {
    Inserted(Booking),
    /// A booking already exists for this (event, user).
    Duplicate,
    /// The event has max_attendees and every seat is taken.
    Full,
}

pub struct BookingRepository;

impl BookingRepository {
    pub async fn find_by_event_and_user(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
    ) -> AppResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE event_id = ? AND user_id = ?"
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(booking)
    }

    /// Insert a booking only if the (event, user) pair is unbooked and the
    /// event still has a seat. Both guards live in one statement, so two
    /// concurrent registrations cannot both pass them; the unique index on
    /// (event_id, user_id) backs the duplicate guard at the storage layer.
    ///
    /// A pending paid booking counts against capacity until it is cancelled,
    /// which keeps confirmed bookings at or below max_attendees even when
    /// several checkouts are in flight.
    pub async fn insert_guarded(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
        status: &str,
        payment_status: &str,
        stripe_payment_intent_id: Option<&str>,
    ) -> AppResult<BookingInsert> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO bookings (
                id, event_id, user_id, status, payment_status,
                stripe_payment_intent_id, created_at, updated_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM bookings WHERE event_id = ? AND user_id = ?
            )
            AND (
                (SELECT max_attendees FROM events WHERE id = ?) IS NULL
                OR (SELECT COUNT(*) FROM bookings WHERE event_id = ?)
                    < (SELECT max_attendees FROM events WHERE id = ?)
            )
            "#,
        )
        .bind(&id)
        .bind(event_id)
        .bind(user_id)
        .bind(status)
        .bind(payment_status)
        .bind(stripe_payment_intent_id)
        .bind(now)
        .bind(now)
        .bind(event_id)
        .bind(user_id)
        .bind(event_id)
        .bind(event_id)
        .bind(event_id)
        .execute(pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 1 => {
                let booking = Self::find_by_event_and_user(pool, event_id, user_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(anyhow::anyhow!(
                            "booking inserted but not found for event {}",
                            event_id
                        ))
                    })?;
                Ok(BookingInsert::Inserted(booking))
            }
            Ok(_) => {
                // The statement inserted nothing; decide which guard fired.
                if Self::find_by_event_and_user(pool, event_id, user_id)
                    .await?
                    .is_some()
                {
                    Ok(BookingInsert::Duplicate)
                } else {
                    Ok(BookingInsert::Full)
                }
            }
            Err(e) => {
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false)
                {
                    Ok(BookingInsert::Duplicate)
                } else {
                    Err(AppError::Database(e))
                }
            }
        }
    }

    /// Flip the booking referencing a PaymentIntent to confirmed/completed.
    /// Returns the number of rows touched; safe to call repeatedly for the
    /// same intent (the second call re-applies the same terminal values).
    pub async fn confirm_by_payment_intent(
        pool: &SqlitePool,
        payment_intent_id: &str,
    ) -> AppResult<u64> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = ?, payment_status = ?, updated_at = ?
            WHERE stripe_payment_intent_id = ?
            "#,
        )
        .bind(BOOKING_STATUS_CONFIRMED)
        .bind(PAYMENT_STATUS_COMPLETED)
        .bind(now)
        .bind(payment_intent_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Recovery path: the pending row for a succeeded payment is gone, so
    /// write a confirmed booking keyed by the metadata Stripe echoed back.
    /// Upserts on (event_id, user_id) so a concurrent confirmation cannot
    /// produce a second row.
    pub async fn upsert_confirmed(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
        payment_intent_id: &str,
    ) -> AppResult<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, event_id, user_id, status, payment_status,
                stripe_payment_intent_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id, user_id) DO UPDATE SET
                status = excluded.status,
                payment_status = excluded.payment_status,
                stripe_payment_intent_id = excluded.stripe_payment_intent_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(event_id)
        .bind(user_id)
        .bind(BOOKING_STATUS_CONFIRMED)
        .bind(PAYMENT_STATUS_COMPLETED)
        .bind(payment_intent_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Remove the (event, user) booking. Returns whether a row existed;
    /// deleting an absent booking is a no-op, not an error.
    pub async fn delete_by_event_and_user(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM bookings WHERE event_id = ? AND user_id = ?")
            .bind(event_id)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_confirmed(pool: &SqlitePool, event_id: &str) -> AppResult<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE event_id = ? AND status = ?")
                .bind(event_id)
                .bind(BOOKING_STATUS_CONFIRMED)
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(count.0)
    }

    /// The caller's bookings joined with their event summaries, newest event
    /// first. Used by the dashboard.
    pub async fn list_with_events_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Vec<BookingWithEvent>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, chrono::NaiveDateTime, String, String, chrono::NaiveDateTime, Option<chrono::NaiveDateTime>, f64, bool)>(
            r#"
            SELECT
                b.id, b.event_id, b.status, b.payment_status, b.created_at,
                e.title, e.location, e.date, e.end_date, e.price, e.is_free
            FROM bookings b
            JOIN events e ON e.id = b.event_id
            WHERE b.user_id = ?
            ORDER BY e.date ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    event_id,
                    status,
                    payment_status,
                    created_at,
                    event_title,
                    event_location,
                    event_date,
                    event_end_date,
                    event_price,
                    event_is_free,
                )| BookingWithEvent {
                    id,
                    event_id,
                    status,
                    payment_status,
                    created_at,
                    event_title,
                    event_location,
                    event_date,
                    event_end_date,
                    event_price,
                    event_is_free,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use futures::future::join_all;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;
    use crate::db::models::{
        EventInput, BOOKING_STATUS_PENDING, EVENT_TYPE_IN_PERSON, PAYMENT_STATUS_PENDING,
    };
    use crate::db::repository::{EventRepository, UserRepository};

    async fn test_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_user(pool: &SqlitePool, email: &str) -> String {
        UserRepository::insert(pool, email, "hash", "Test User")
            .await
            .unwrap()
            .id
    }

    async fn seed_event(pool: &SqlitePool, organizer: &str, max_attendees: Option<i64>) -> String {
        let input = EventInput {
            title: "Meetup".to_string(),
            description: "A meetup".to_string(),
            location: "Town Hall".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: Utc::now().naive_utc() + chrono::Duration::days(7),
            end_date: None,
            price: 0.0,
            max_attendees,
            image_url: None,
        };
        EventRepository::insert(pool, organizer, &input)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn free_attend_then_duplicate_is_rejected() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let attendee = seed_user(&pool, "user@example.com").await;
        let event = seed_event(&pool, &organizer, None).await;

        let first = BookingRepository::insert_guarded(
            &pool,
            &event,
            &attendee,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await
        .unwrap();
        assert!(matches!(first, BookingInsert::Inserted(ref b) if b.is_confirmed()));

        let second = BookingRepository::insert_guarded(
            &pool,
            &event,
            &attendee,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await
        .unwrap();
        assert!(matches!(second, BookingInsert::Duplicate));

        assert_eq!(BookingRepository::count_confirmed(&pool, &event).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_then_attend_produces_fresh_booking() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let attendee = seed_user(&pool, "user@example.com").await;
        let event = seed_event(&pool, &organizer, None).await;

        let first = BookingRepository::insert_guarded(
            &pool,
            &event,
            &attendee,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await
        .unwrap();
        let first_id = match first {
            BookingInsert::Inserted(b) => b.id,
            other => panic!("expected insert, got {:?}", other),
        };

        assert!(BookingRepository::delete_by_event_and_user(&pool, &event, &attendee)
            .await
            .unwrap());
        // Second delete is a no-op, not an error.
        assert!(!BookingRepository::delete_by_event_and_user(&pool, &event, &attendee)
            .await
            .unwrap());

        let again = BookingRepository::insert_guarded(
            &pool,
            &event,
            &attendee,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await
        .unwrap();
        match again {
            BookingInsert::Inserted(b) => assert_ne!(b.id, first_id),
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn capacity_holds_under_concurrent_attends() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let event = seed_event(&pool, &organizer, Some(3)).await;

        let mut attendees = Vec::new();
        for i in 0..10 {
            attendees.push(seed_user(&pool, &format!("user{}@example.com", i)).await);
        }

        let attempts = attendees.iter().map(|user_id| {
            let pool = pool.clone();
            let event = event.clone();
            let user_id = user_id.clone();
            async move {
                BookingRepository::insert_guarded(
                    &pool,
                    &event,
                    &user_id,
                    BOOKING_STATUS_CONFIRMED,
                    PAYMENT_STATUS_COMPLETED,
                    None,
                )
                .await
            }
        });

        let results = join_all(attempts).await;
        let inserted = results
            .iter()
            .filter(|r| matches!(r, Ok(BookingInsert::Inserted(_))))
            .count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Ok(BookingInsert::Full)))
            .count();

        assert_eq!(inserted, 3);
        assert_eq!(full, 7);
        assert_eq!(BookingRepository::count_confirmed(&pool, &event).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn pending_booking_holds_its_seat() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let event = seed_event(&pool, &organizer, Some(1)).await;
        let payer = seed_user(&pool, "payer@example.com").await;
        let other = seed_user(&pool, "other@example.com").await;

        let pending = BookingRepository::insert_guarded(
            &pool,
            &event,
            &payer,
            BOOKING_STATUS_PENDING,
            PAYMENT_STATUS_PENDING,
            Some("pi_test_1"),
        )
        .await
        .unwrap();
        assert!(matches!(pending, BookingInsert::Inserted(_)));

        let blocked = BookingRepository::insert_guarded(
            &pool,
            &event,
            &other,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await
        .unwrap();
        assert!(matches!(blocked, BookingInsert::Full));
    }

    #[tokio::test]
    async fn confirm_by_intent_is_idempotent() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let payer = seed_user(&pool, "payer@example.com").await;
        let event = seed_event(&pool, &organizer, None).await;

        BookingRepository::insert_guarded(
            &pool,
            &event,
            &payer,
            BOOKING_STATUS_PENDING,
            PAYMENT_STATUS_PENDING,
            Some("pi_test_42"),
        )
        .await
        .unwrap();

        assert_eq!(
            BookingRepository::confirm_by_payment_intent(&pool, "pi_test_42")
                .await
                .unwrap(),
            1
        );
        // Second confirmation touches the same single row; no duplicates appear.
        assert_eq!(
            BookingRepository::confirm_by_payment_intent(&pool, "pi_test_42")
                .await
                .unwrap(),
            1
        );

        assert_eq!(BookingRepository::count_confirmed(&pool, &event).await.unwrap(), 1);
        let booking = BookingRepository::find_by_event_and_user(&pool, &event, &payer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(booking.status, BOOKING_STATUS_CONFIRMED);
        assert_eq!(booking.payment_status, PAYMENT_STATUS_COMPLETED);
        assert_eq!(booking.stripe_payment_intent_id.as_deref(), Some("pi_test_42"));
    }

    #[tokio::test]
    async fn upsert_confirmed_recovers_without_duplicating() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let payer = seed_user(&pool, "payer@example.com").await;
        let event = seed_event(&pool, &organizer, None).await;

        // No pending row exists; recovery insert creates the confirmed booking.
        BookingRepository::upsert_confirmed(&pool, &event, &payer, "pi_lost")
            .await
            .unwrap();
        // Replaying the recovery keeps a single row.
        BookingRepository::upsert_confirmed(&pool, &event, &payer, "pi_lost")
            .await
            .unwrap();

        assert_eq!(BookingRepository::count_confirmed(&pool, &event).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_event_cascades_bookings() {
        let pool = test_pool().await;
        let organizer = seed_user(&pool, "org@example.com").await;
        let attendee = seed_user(&pool, "user@example.com").await;
        let event = seed_event(&pool, &organizer, None).await;

        BookingRepository::insert_guarded(
            &pool,
            &event,
            &attendee,
            BOOKING_STATUS_CONFIRMED,
            PAYMENT_STATUS_COMPLETED,
            None,
        )
        .await
        .unwrap();

        EventRepository::delete(&pool, &event).await.unwrap();

        assert!(
            BookingRepository::find_by_event_and_user(&pool, &event, &attendee)
                .await
                .unwrap()
                .is_none()
        );
    }
}

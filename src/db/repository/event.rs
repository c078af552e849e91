use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Event, EventInput};
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = r#"
    id, organizer_id, title, description, location, event_type,
    date, end_date, price, is_free, max_attendees, image_url,
    created_at, updated_at
"#;

pub struct EventRepository;

impl EventRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(event)
    }

    /// Upcoming events ordered by start date. `search` matches title,
    /// description or location (case-insensitive substring); `event_type`
    /// narrows to "in-person" or "online".
    pub async fn list_upcoming(
        pool: &SqlitePool,
        search: Option<&str>,
        event_type: Option<&str>,
        now: NaiveDateTime,
    ) -> AppResult<Vec<Event>> {
        let pattern = search
            .map(|s| format!("%{}%", s.trim().to_lowercase()))
            .filter(|p| p != "%%");
        let search_active = pattern.is_some() as i64;
        let type_filter = event_type.filter(|t| !t.is_empty());

        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE date >= ?
              AND (? IS NULL OR event_type = ?)
              AND (
                ? = 0
                OR LOWER(title) LIKE ?
                OR LOWER(description) LIKE ?
                OR LOWER(location) LIKE ?
              )
            ORDER BY date ASC
            "#
        ))
        .bind(now)
        .bind(type_filter)
        .bind(type_filter)
        .bind(search_active)
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(events)
    }

    pub async fn list_by_organizer(pool: &SqlitePool, organizer_id: &str) -> AppResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE organizer_id = ? ORDER BY date ASC"
        ))
        .bind(organizer_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(events)
    }

    pub async fn insert(
        pool: &SqlitePool,
        organizer_id: &str,
        input: &EventInput,
    ) -> AppResult<Event> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (
                id, organizer_id, title, description, location, event_type,
                date, end_date, price, is_free, max_attendees, image_url,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(organizer_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.location)
        .bind(&input.event_type)
        .bind(input.date)
        .bind(input.end_date)
        .bind(input.price)
        .bind(input.is_free())
        .bind(input.max_attendees)
        .bind(&input.image_url)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(event)
    }

    /// Replace the mutable fields of an event. Ownership is checked by the
    /// caller; `is_free` is recomputed from the new price.
    pub async fn update(pool: &SqlitePool, id: &str, input: &EventInput) -> AppResult<Event> {
        let now = Utc::now().naive_utc();

        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET
                title = ?,
                description = ?,
                location = ?,
                event_type = ?,
                date = ?,
                end_date = ?,
                price = ?,
                is_free = ?,
                max_attendees = ?,
                image_url = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.location)
        .bind(&input.event_type)
        .bind(input.date)
        .bind(input.end_date)
        .bind(input.price)
        .bind(input.is_free())
        .bind(input.max_attendees)
        .bind(&input.image_url)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(event)
    }

    /// Delete an event. Bookings cascade via the foreign key.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn count_all(pool: &SqlitePool) -> AppResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(count.0)
    }
}

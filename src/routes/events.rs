use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Event, EventInput, EVENT_TYPE_IN_PERSON, EVENT_TYPE_ONLINE};
use crate::db::{BookingRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_events).post(create_event))
        .route("/mine", get(list_my_events))
        .route(
            "/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

/// Create/update payload. Dates arrive as RFC 3339 strings; `is_free` is
/// derived server-side and not accepted from the client.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub title: String,
    pub description: String,
    pub location: String,
    pub event_type: String,
    pub date: String,
    pub end_date: Option<String>,
    pub price: f64,
    pub max_attendees: Option<i64>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventDetailResponse {
    #[serde(flatten)]
    pub event: Event,
    pub confirmed_attendees: i64,
}

fn parse_rfc3339(value: &str, field: &str) -> AppResult<chrono::NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .map_err(|_| AppError::Validation(format!("{} must be an RFC 3339 datetime", field)))
}

impl EventRequest {
    fn into_input(self) -> AppResult<EventInput> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(AppError::Validation("Description is required".to_string()));
        }
        if self.location.trim().is_empty() {
            return Err(AppError::Validation("Location is required".to_string()));
        }
        if self.event_type != EVENT_TYPE_IN_PERSON && self.event_type != EVENT_TYPE_ONLINE {
            return Err(AppError::Validation(format!(
                "Event type must be '{}' or '{}'",
                EVENT_TYPE_IN_PERSON, EVENT_TYPE_ONLINE
            )));
        }
        if self.price < 0.0 || !self.price.is_finite() {
            return Err(AppError::Validation(
                "Price must be zero or positive".to_string(),
            ));
        }
        if let Some(max) = self.max_attendees {
            if max < 1 {
                return Err(AppError::Validation(
                    "Max attendees must be at least 1".to_string(),
                ));
            }
        }

        let date = parse_rfc3339(&self.date, "date")?;
        let end_date = self
            .end_date
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| parse_rfc3339(s, "end_date"))
            .transpose()?;

        if let Some(end) = end_date {
            if end <= date {
                return Err(AppError::Validation(
                    "End date must be after the start date".to_string(),
                ));
            }
        }

        Ok(EventInput {
            title: self.title.trim().to_string(),
            description: self.description,
            location: self.location.trim().to_string(),
            event_type: self.event_type,
            date,
            end_date,
            price: self.price,
            max_attendees: self.max_attendees,
            image_url: self.image_url.filter(|u| !u.is_empty()),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Public catalog: upcoming events, optionally filtered by search text and
/// event type, ordered by start date.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    let event_type = query
        .event_type
        .as_deref()
        .filter(|t| *t != "all" && !t.is_empty());

    let events = EventRepository::list_upcoming(
        &state.db,
        query.search.as_deref(),
        event_type,
        Utc::now().naive_utc(),
    )
    .await?;

    Ok(Json(events))
}

/// Events owned by the caller, for the organizer dashboard.
async fn list_my_events(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Event>>, AppError> {
    let events = EventRepository::list_by_organizer(&state.db, &user.id).await?;
    Ok(Json(events))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EventDetailResponse>, AppError> {
    let event = EventRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

    let confirmed_attendees = BookingRepository::count_confirmed(&state.db, &id).await?;

    Ok(Json(EventDetailResponse {
        event,
        confirmed_attendees,
    }))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<EventRequest>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let input = request.into_input()?;
    let event = EventRepository::insert(&state.db, &user.id, &input).await?;

    tracing::info!("User {} created event {}", user.id, event.id);

    Ok((StatusCode::CREATED, Json(event)))
}

async fn update_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<EventRequest>,
) -> Result<Json<Event>, AppError> {
    let existing = EventRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

    // Only the organizer may mutate an event.
    if existing.organizer_id != user.id {
        return Err(AppError::Forbidden);
    }

    let input = request.into_input()?;
    let event = EventRepository::update(&state.db, &id, &input).await?;

    Ok(Json(event))
}

async fn delete_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let existing = EventRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

    if existing.organizer_id != user.id {
        return Err(AppError::Forbidden);
    }

    EventRepository::delete(&state.db, &id).await?;

    tracing::info!("User {} deleted event {}", user.id, id);

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(price: f64, date: &str, end_date: Option<&str>) -> EventRequest {
        EventRequest {
            title: "Meetup".to_string(),
            description: "A meetup".to_string(),
            location: "Town Hall".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: date.to_string(),
            end_date: end_date.map(|s| s.to_string()),
            price,
            max_attendees: None,
            image_url: None,
        }
    }

    #[test]
    fn is_free_follows_price() {
        let input = request(0.0, "2030-06-01T18:00:00Z", None)
            .into_input()
            .unwrap();
        assert!(input.is_free());

        let input = request(25.0, "2030-06-01T18:00:00Z", None)
            .into_input()
            .unwrap();
        assert!(!input.is_free());
    }

    #[test]
    fn rejects_invalid_dates_and_ordering() {
        assert!(request(0.0, "not-a-date", None).into_input().is_err());
        assert!(request(
            0.0,
            "2030-06-01T18:00:00Z",
            Some("2030-06-01T17:00:00Z")
        )
        .into_input()
        .is_err());
        assert!(request(
            0.0,
            "2030-06-01T18:00:00Z",
            Some("2030-06-01T20:00:00Z")
        )
        .into_input()
        .is_ok());
    }

    #[test]
    fn rejects_negative_price_and_bad_type() {
        assert!(request(-1.0, "2030-06-01T18:00:00Z", None)
            .into_input()
            .is_err());

        let mut bad_type = request(0.0, "2030-06-01T18:00:00Z", None);
        bad_type.event_type = "hybrid".to_string();
        assert!(bad_type.into_input().is_err());
    }
}

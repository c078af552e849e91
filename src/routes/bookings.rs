use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;

use crate::db::models::BookingWithEvent;
use crate::db::BookingRepository;
use crate::error::AppError;
use crate::routes::auth::AuthUser;
use crate::services::booking::{AttendOutcome, BookingService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/:id/attend", post(attend_event))
        .route("/events/:id/booking", delete(cancel_booking))
        .route("/bookings", get(list_my_bookings))
}

/// Register for an event. Free events confirm immediately (201); paid events
/// return the PaymentIntent client secret for the frontend checkout (200).
async fn attend_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    match BookingService::attend(&state, &event_id, &user.id).await? {
        AttendOutcome::Confirmed(booking) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "booking_id": booking.id,
                "status": booking.status,
                "payment_status": booking.payment_status,
            })),
        )),
        AttendOutcome::PaymentRequired { client_secret } => Ok((
            StatusCode::OK,
            Json(json!({ "client_secret": client_secret })),
        )),
    }
}

/// Cancel the caller's booking for an event. A missing booking is reported,
/// not an error, so retries and double-clicks are harmless.
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancelled = BookingService::cancel(&state, &event_id, &user.id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// The caller's bookings with event summaries, for the dashboard.
async fn list_my_bookings(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<BookingWithEvent>>, AppError> {
    let bookings = BookingRepository::list_with_events_for_user(&state.db, &user.id).await?;
    Ok(Json(bookings))
}

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde_json::json;

use crate::error::AppError;
use crate::routes::auth::AuthUser;
use crate::services::seed;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/seed", post(seed_sample_events))
}

/// Insert sample events owned by the caller. Idempotent; exists so a fresh
/// installation can be populated without touching the database by hand.
async fn seed_sample_events(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let inserted = seed::seed_events(&state.db, &user.id).await?;

    Ok(Json(json!({
        "seeded": inserted > 0,
        "inserted": inserted,
    })))
}

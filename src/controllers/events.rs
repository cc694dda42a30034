use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/{id}/seats", get(get_seat_map))
        .route("/events/{id}/capacity", put(update_capacity))
}

// GET /api/events/{id}/seats
async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let map = state.capacity.seat_map(event_id).await?;
    Ok(Json(map))
}

// PUT /api/events/{id}/capacity
#[derive(Debug, Deserialize, Validate)]
pub struct CapacityRequest {
    #[validate(range(min = 0, max = 100000))]
    pub total_slots: i32,
}

async fn update_capacity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<CapacityRequest>,
) -> AppResult<impl IntoResponse> {
    let req = validated(req)?;
    tracing::info!(%event_id, user_id = %user.user_id, total_slots = req.total_slots, "capacity update requested");
    let event = state.capacity.resize(event_id, req.total_slots).await?;
    Ok(Json(event))
}

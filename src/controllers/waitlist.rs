use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::models::{WaitlistEntry, WaitlistStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/waitlist", post(join_waitlist))
        .route("/waitlist/confirm", post(confirm_offer))
        .route("/waitlist/timeout", post(offer_timeout))
        .route(
            "/waitlist/{event_id}",
            get(get_standing).delete(leave_waitlist),
        )
}

#[derive(Debug, Deserialize)]
pub struct EventRef {
    pub event_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub event_id: Uuid,
    pub position: i32,
    pub status: WaitlistStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<WaitlistEntry> for EntryResponse {
    fn from(entry: WaitlistEntry) -> Self {
        Self {
            event_id: entry.event_id,
            position: entry.position,
            status: entry.status,
            expires_at: entry.expires_at,
        }
    }
}

// POST /api/waitlist
async fn join_waitlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<EventRef>,
) -> AppResult<impl IntoResponse> {
    let join = state.waitlist.join(user.user_id, req.event_id).await?;
    let status = if join.already_queued {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(EntryResponse::from(join.entry))))
}

// GET /api/waitlist/{event_id}
async fn get_standing(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let standing = state.waitlist.standing(user.user_id, event_id).await?;
    Ok(Json(standing))
}

// DELETE /api/waitlist/{event_id}
async fn leave_waitlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let release = state.waitlist.withdraw(user.user_id, event_id).await?;
    Ok(Json(EntryResponse::from(release.entry)))
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub booking_id: Uuid,
    pub event_id: Uuid,
    pub seat_no: i32,
    pub available: i32,
}

// POST /api/waitlist/confirm
async fn confirm_offer(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<EventRef>,
) -> AppResult<impl IntoResponse> {
    let confirmation = state.waitlist.confirm(user.user_id, req.event_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ConfirmResponse {
            booking_id: confirmation.booking.id,
            event_id: req.event_id,
            seat_no: confirmation.seat_no,
            available: confirmation.available,
        }),
    ))
}

// POST /api/waitlist/timeout
async fn offer_timeout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<EventRef>,
) -> AppResult<impl IntoResponse> {
    let release = state.waitlist.expire(user.user_id, req.event_id).await?;
    Ok(Json(EntryResponse::from(release.entry)))
}

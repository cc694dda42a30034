use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::models::BookingStatus;
use crate::services::CreateBooking;
use crate::store::{AllocationOutcome, CancelOutcome};
use crate::AppState;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(get_user_bookings))
        .route("/bookings/{id}/seats", get(get_booking_seats))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/cancel-seats", post(cancel_seats))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub event_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub seats: i32,
    #[serde(default)]
    pub seat_numbers: Option<Vec<i32>>,
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> AppResult<impl IntoResponse> {
    let req = validated(req)?;
    // ключ можно передать и заголовком
    let idempotency_key = req.idempotency_key.or_else(|| {
        headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let outcome = state
        .bookings
        .create_booking(
            user.user_id,
            CreateBooking {
                event_id: req.event_id,
                seats: req.seats,
                preferred: req.seat_numbers,
                idempotency_key,
            },
        )
        .await?;

    let status = match outcome {
        AllocationOutcome::Confirmed { .. } => StatusCode::CREATED,
        AllocationOutcome::Waitlisted { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

// GET /api/bookings
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let bookings = state.bookings.user_bookings(user.user_id).await?;
    Ok(Json(bookings))
}

// GET /api/bookings/{id}/seats
async fn get_booking_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let seats = state.bookings.booking_seats(user.user_id, booking_id).await?;
    Ok(Json(seats))
}

/* ---------- CANCELLATION ---------- */

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub cancelled: usize,
    pub cancelled_seats: Vec<i32>,
    pub available: i32,
    pub already_cancelled: bool,
}

impl From<CancelOutcome> for CancelResponse {
    fn from(outcome: CancelOutcome) -> Self {
        Self {
            booking_id: outcome.booking.id,
            status: outcome.booking.status,
            cancelled: outcome.freed.len(),
            cancelled_seats: outcome.freed,
            available: outcome.available,
            already_cancelled: outcome.already_cancelled,
        }
    }
}

// POST /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let outcome = state
        .cancellations
        .cancel_booking(user.user_id, booking_id)
        .await?;
    Ok(Json(CancelResponse::from(outcome)))
}

// POST /api/bookings/{id}/cancel-seats
#[derive(Debug, Deserialize, Validate)]
pub struct CancelSeatsRequest {
    #[validate(length(min = 1, max = 1000))]
    pub seat_numbers: Vec<i32>,
}

async fn cancel_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<CancelSeatsRequest>,
) -> AppResult<impl IntoResponse> {
    let req = validated(req)?;
    let outcome = state
        .cancellations
        .cancel_seats(user.user_id, booking_id, &req.seat_numbers)
        .await?;
    Ok(Json(CancelResponse::from(outcome)))
}

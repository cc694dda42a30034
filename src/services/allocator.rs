use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::notifications::{Notification, NotificationKind};
use super::BookingContext;
use crate::allocation::validate_request;
use crate::error::{AppError, AppResult};
use crate::store::{AllocationOutcome, AllocationRequest, BookingSeats, BookingSummary};

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub event_id: Uuid,
    pub seats: i32,
    pub preferred: Option<Vec<i32>>,
    pub idempotency_key: Option<String>,
}

fn idempotency_token(event_id: Uuid, user_id: Uuid, key: &str) -> String {
    format!("booking:idempo:{}:{}:{}", event_id, user_id, key)
}

/// Создание брони: подтверждение при достаточной ёмкости, иначе лист ожидания.
#[derive(Clone)]
pub struct BookingService {
    ctx: Arc<BookingContext>,
}

impl BookingService {
    pub fn new(ctx: Arc<BookingContext>) -> Self {
        Self { ctx }
    }

    pub async fn create_booking(
        &self,
        user_id: Uuid,
        request: CreateBooking,
    ) -> AppResult<AllocationOutcome> {
        validate_request(request.seats, request.preferred.as_deref())?;

        if let Some(key) = request.idempotency_key.as_deref().filter(|k| !k.is_empty()) {
            self.claim_idempotency(request.event_id, user_id, key).await?;
        }

        let allocation = AllocationRequest {
            event_id: request.event_id,
            user_id,
            seats: request.seats,
            preferred: request.preferred,
        };
        let outcome = self.ctx.store.allocate(&allocation, self.ctx.now()).await?;

        match &outcome {
            AllocationOutcome::Confirmed {
                booking,
                seats,
                available,
            } => {
                info!(
                    booking_id = %booking.id,
                    event_id = %booking.event_id,
                    %user_id,
                    seats = ?seats,
                    available,
                    "booking confirmed"
                );
                self.ctx.clear_holds(booking.event_id, seats).await;
                self.ctx.announce_booked(booking.event_id, seats, *available);
                self.ctx.notifier.publish(
                    Notification::new(NotificationKind::BookingConfirmed, booking.event_id, user_id)
                        .with_seats(seats.clone()),
                );
            }
            AllocationOutcome::Waitlisted {
                booking,
                position,
                already_queued,
            } => {
                info!(
                    booking_id = %booking.id,
                    event_id = %booking.event_id,
                    %user_id,
                    position,
                    already_queued,
                    "booking waitlisted"
                );
                if !already_queued {
                    self.ctx.notifier.publish(
                        Notification::new(NotificationKind::BookingWaitlisted, booking.event_id, user_id)
                            .with_message(format!("You are number {} on the waitlist", position)),
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// Повтор в пределах TTL даёт конфликт. Недоступное хранилище не мешает брони.
    async fn claim_idempotency(&self, event_id: Uuid, user_id: Uuid, key: &str) -> AppResult<()> {
        let token = idempotency_token(event_id, user_id, key);
        let ttl = Duration::from_secs(self.ctx.holds_config.idempotency_ttl_secs);
        match self.ctx.holds.claim_token(&token, ttl).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::conflict(
                "duplicate request: this idempotency key was already used",
            )),
            Err(e) => {
                warn!(%event_id, %user_id, error = %e, "idempotency store unavailable, proceeding without it");
                Ok(())
            }
        }
    }

    pub async fn booking_seats(&self, user_id: Uuid, booking_id: Uuid) -> AppResult<BookingSeats> {
        let booking = self.ctx.store.booking(booking_id).await?;
        if booking.user_id != user_id {
            return Err(AppError::not_found("booking"));
        }
        let seats = self.ctx.store.booking_seats(booking_id, self.ctx.now()).await?;
        if !seats.backfilled.is_empty() {
            let event = self.ctx.store.event(booking.event_id).await?;
            self.ctx.clear_holds(booking.event_id, &seats.backfilled).await;
            self.ctx
                .announce_booked(booking.event_id, &seats.backfilled, event.available_slots);
        }
        Ok(seats)
    }

    pub async fn user_bookings(&self, user_id: Uuid) -> AppResult<Vec<BookingSummary>> {
        self.ctx.store.user_bookings(user_id).await
    }
}

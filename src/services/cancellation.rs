use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::notifications::{Notification, NotificationKind};
use super::BookingContext;
use crate::error::{AppError, AppResult};
use crate::store::CancelOutcome;

/// Отмена брони целиком или по местам с передачей мест листу ожидания.
#[derive(Clone)]
pub struct CancellationService {
    ctx: Arc<BookingContext>,
}

impl CancellationService {
    pub fn new(ctx: Arc<BookingContext>) -> Self {
        Self { ctx }
    }

    pub async fn cancel_booking(&self, user_id: Uuid, booking_id: Uuid) -> AppResult<CancelOutcome> {
        self.ensure_owner(user_id, booking_id).await?;
        self.cancel(booking_id, None).await
    }

    pub async fn cancel_seats(
        &self,
        user_id: Uuid,
        booking_id: Uuid,
        seat_numbers: &[i32],
    ) -> AppResult<CancelOutcome> {
        if seat_numbers.is_empty() {
            return Err(AppError::invalid("seat_numbers must not be empty"));
        }
        if let Some(bad) = seat_numbers.iter().find(|n| **n <= 0) {
            return Err(AppError::invalid(format!("seat number {} is not positive", bad)));
        }
        let seats: Vec<i32> = seat_numbers
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.ensure_owner(user_id, booking_id).await?;
        self.cancel(booking_id, Some(&seats)).await
    }

    async fn ensure_owner(&self, user_id: Uuid, booking_id: Uuid) -> AppResult<()> {
        let booking = self.ctx.store.booking(booking_id).await?;
        if booking.user_id != user_id {
            return Err(AppError::not_found("booking"));
        }
        Ok(())
    }

    async fn cancel(&self, booking_id: Uuid, seats: Option<&[i32]>) -> AppResult<CancelOutcome> {
        let outcome = self
            .ctx
            .store
            .cancel(booking_id, seats, self.ctx.now(), self.ctx.offer_window())
            .await?;
        if outcome.already_cancelled {
            return Ok(outcome);
        }

        let event_id = outcome.booking.event_id;
        info!(
            %booking_id,
            %event_id,
            freed = ?outcome.freed,
            offers = outcome.handoff.offers.len(),
            available = outcome.available,
            "booking cancellation committed"
        );

        if !outcome.freed.is_empty() {
            self.ctx.announce_availability(event_id, outcome.available);
        }
        self.ctx.announce_handoff(event_id, &outcome.handoff);

        if !outcome.freed.is_empty() || seats.is_none() {
            self.ctx.notifier.publish(
                Notification::new(
                    NotificationKind::BookingCancelled,
                    event_id,
                    outcome.booking.user_id,
                )
                .with_seats(outcome.freed.clone()),
            );
        }
        Ok(outcome)
    }
}

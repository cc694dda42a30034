use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::BookingContext;
use crate::error::{AppError, AppResult};
use crate::models::{Event, SeatMap};

#[derive(Clone)]
pub struct CapacityService {
    ctx: Arc<BookingContext>,
}

impl CapacityService {
    pub fn new(ctx: Arc<BookingContext>) -> Self {
        Self { ctx }
    }

    pub async fn seat_map(&self, event_id: Uuid) -> AppResult<SeatMap> {
        self.ctx.store.seat_map(event_id).await
    }

    /// Меняет общее число мест. Новые места сначала предлагаются листу ожидания.
    pub async fn resize(&self, event_id: Uuid, total_slots: i32) -> AppResult<Event> {
        if total_slots < 0 {
            return Err(AppError::invalid("total_slots must not be negative"));
        }
        let change = self
            .ctx
            .store
            .resize_capacity(event_id, total_slots, self.ctx.now(), self.ctx.offer_window())
            .await?;
        info!(
            %event_id,
            total_slots,
            available = change.event.available_slots,
            offers = change.handoff.offers.len(),
            "event capacity changed"
        );
        self.ctx
            .announce_availability(event_id, change.event.available_slots);
        self.ctx.announce_handoff(event_id, &change.handoff);
        Ok(change.event)
    }
}

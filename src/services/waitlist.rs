use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::notifications::{Notification, NotificationKind};
use super::BookingContext;
use crate::error::AppResult;
use crate::realtime::ServerEvent;
use crate::store::{OfferConfirmation, OfferRelease, WaitlistJoin, WaitlistStanding};

/// Автомат листа ожидания: waiting → notified → confirmed | expired → waiting.
#[derive(Clone)]
pub struct WaitlistService {
    ctx: Arc<BookingContext>,
}

impl WaitlistService {
    pub fn new(ctx: Arc<BookingContext>) -> Self {
        Self { ctx }
    }

    pub async fn join(&self, user_id: Uuid, event_id: Uuid) -> AppResult<WaitlistJoin> {
        let join = self
            .ctx
            .store
            .join_waitlist(event_id, user_id, self.ctx.now())
            .await?;
        info!(
            %event_id,
            %user_id,
            position = join.entry.position,
            already_queued = join.already_queued,
            "joined waitlist"
        );
        Ok(join)
    }

    pub async fn standing(&self, user_id: Uuid, event_id: Uuid) -> AppResult<WaitlistStanding> {
        self.ctx
            .store
            .waitlist_standing(event_id, user_id, self.ctx.now())
            .await
    }

    /// Подтверждение оффера. Дедлайн и наличие места проверяются по часам
    /// сервера и текущему счётчику, а не по словам клиента.
    pub async fn confirm(&self, user_id: Uuid, event_id: Uuid) -> AppResult<OfferConfirmation> {
        let confirmation = self
            .ctx
            .store
            .confirm_offer(event_id, user_id, self.ctx.now())
            .await?;
        let seat_no = confirmation.seat_no;
        info!(%event_id, %user_id, seat_no, available = confirmation.available, "waitlist offer confirmed");

        self.ctx.clear_holds(event_id, &[seat_no]).await;
        self.ctx
            .announce_booked(event_id, &[seat_no], confirmation.available);
        self.ctx.hub.broadcast(
            event_id,
            ServerEvent::WaitlistSeatConfirmed {
                event_id,
                user_id,
                seat_no,
            },
        );
        self.ctx.notifier.publish(
            Notification::new(NotificationKind::WaitlistConfirmed, event_id, user_id)
                .with_seats(vec![seat_no]),
        );
        Ok(confirmation)
    }

    /// Оффер истёк: запись возвращается в очередь, место уходит дальше.
    pub async fn expire(&self, user_id: Uuid, event_id: Uuid) -> AppResult<OfferRelease> {
        let release = self
            .ctx
            .store
            .expire_offer(event_id, user_id, self.ctx.now(), self.ctx.offer_window())
            .await?;
        info!(
            %event_id,
            %user_id,
            reoffered = release.handoff.offers.len(),
            freed = release.handoff.released.len(),
            "waitlist offer lapsed"
        );
        self.ctx.announce_handoff(event_id, &release.handoff);
        Ok(release)
    }

    pub async fn withdraw(&self, user_id: Uuid, event_id: Uuid) -> AppResult<OfferRelease> {
        let release = self
            .ctx
            .store
            .withdraw(event_id, user_id, self.ctx.now(), self.ctx.offer_window())
            .await?;
        info!(%event_id, %user_id, status = %release.entry.status, "left waitlist");
        self.ctx.announce_handoff(event_id, &release.handoff);
        Ok(release)
    }
}

//! Сервисный слой: транзакция в хранилище, затем побочные эффекты
//! (снятие холдов, рассылка в комнату, персональные офферы, уведомления).
//! Эффекты выполняются только после коммита и без гарантий доставки.

pub mod allocator;
pub mod cancellation;
pub mod capacity;
pub mod cleanup;
pub mod notifications;
pub mod waitlist;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{HoldConfig, WaitlistConfig};
use crate::holds::HoldStore;
use crate::realtime::{RoomHub, ServerEvent};
use crate::store::{BookingStore, Handoff};

use self::notifications::{Notification, NotificationKind, NotificationPublisher};

pub use self::allocator::{BookingService, CreateBooking};
pub use self::cancellation::CancellationService;
pub use self::capacity::CapacityService;
pub use self::cleanup::OfferSweeper;
pub use self::waitlist::WaitlistService;

/// Общие зависимости всех сервисов бронирования.
pub struct BookingContext {
    pub store: Arc<dyn BookingStore>,
    pub holds: Arc<dyn HoldStore>,
    pub hub: Arc<RoomHub>,
    pub notifier: Arc<dyn NotificationPublisher>,
    pub clock: Arc<dyn Clock>,
    pub holds_config: HoldConfig,
    pub waitlist_config: WaitlistConfig,
}

impl BookingContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn offer_window(&self) -> chrono::Duration {
        self.waitlist_config.offer_window()
    }

    /// Бронь сильнее холда: стираем холды на забронированных местах.
    pub(crate) async fn clear_holds(&self, event_id: Uuid, seats: &[i32]) {
        for seat_no in seats {
            if let Err(e) = self.holds.clear_hold(event_id, *seat_no).await {
                warn!(%event_id, seat_no, error = %e, "failed to clear hold after booking");
            }
        }
    }

    pub(crate) fn announce_booked(&self, event_id: Uuid, seats: &[i32], available: i32) {
        for seat_no in seats {
            self.hub.broadcast(
                event_id,
                ServerEvent::Booked {
                    event_id,
                    seat_no: *seat_no,
                },
            );
        }
        self.announce_availability(event_id, available);
    }

    pub(crate) fn announce_availability(&self, event_id: Uuid, available: i32) {
        self.hub
            .broadcast(event_id, ServerEvent::AvailabilityUpdated { event_id, available });
    }

    /// Персональные офферы уходят только адресату, остальное уходит в комнату как `freed`.
    pub(crate) fn announce_handoff(&self, event_id: Uuid, handoff: &Handoff) {
        let now = self.now();
        for offer in &handoff.offers {
            let countdown_secs = (offer.expires_at - now).num_seconds().max(0);
            let message = format!(
                "A seat is available for you. Confirm within {} seconds.",
                countdown_secs
            );
            self.hub.send_to_user(
                offer.user_id,
                ServerEvent::SeatAvailableForYou {
                    event_id: offer.event_id,
                    seat_no: offer.seat_no,
                    expires_at: offer.expires_at,
                    countdown_secs,
                    message: message.clone(),
                },
            );
            self.notifier.publish(
                Notification::new(NotificationKind::SeatAvailable, offer.event_id, offer.user_id)
                    .with_seats(offer.seat_no.into_iter().collect())
                    .with_message(message),
            );
        }
        for seat_no in &handoff.released {
            self.hub.broadcast(
                event_id,
                ServerEvent::Freed {
                    event_id,
                    seat_no: *seat_no,
                },
            );
        }
    }
}

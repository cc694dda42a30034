//! Долговременное хранилище бронирований.
//!
//! Каждый метод `BookingStore` это одна транзакция. Решения о вместимости
//! события принимаются только под блокировкой строки события, порядок
//! блокировок везде один: событие → бронь → запись листа ожидания.
//! Методы возвращают описание того, что изменилось, а рассылки и
//! уведомления делает сервисный слой уже после коммита.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Booking, BookingSeat, Event, SeatMap, WaitlistEntry, WaitlistStatus};

pub use self::memory::MemoryBookingStore;
pub use self::postgres::PgBookingStore;

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub seats: i32,
    pub preferred: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationOutcome {
    Confirmed {
        booking: Booking,
        seats: Vec<i32>,
        available: i32,
    },
    Waitlisted {
        booking: Booking,
        position: i32,
        already_queued: bool,
    },
}

/// Персональное предложение места пользователю из листа ожидания.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatOffer {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub seat_no: Option<i32>,
    pub expires_at: DateTime<Utc>,
}

/// Куда ушли освободившиеся места: персональные офферы или общий `freed`.
#[derive(Debug, Clone, Default)]
pub struct Handoff {
    pub offers: Vec<SeatOffer>,
    pub released: Vec<Option<i32>>,
}

impl Handoff {
    pub fn extend(&mut self, other: Handoff) {
        self.offers.extend(other.offers);
        self.released.extend(other.released);
    }
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub booking: Booking,
    pub already_cancelled: bool,
    pub freed: Vec<i32>,
    pub handoff: Handoff,
    pub available: i32,
}

#[derive(Debug, Clone)]
pub struct WaitlistJoin {
    pub entry: WaitlistEntry,
    pub already_queued: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitlistStanding {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub status: WaitlistStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub total_on_waitlist: i64,
    pub ahead: i64,
}

#[derive(Debug, Clone)]
pub struct OfferConfirmation {
    pub booking: Booking,
    pub seat_no: i32,
    pub available: i32,
}

/// Результат таймаута или отказа от оффера.
#[derive(Debug, Clone)]
pub struct OfferRelease {
    pub entry: WaitlistEntry,
    pub handoff: Handoff,
    pub available: i32,
}

#[derive(Debug, Clone)]
pub struct CapacityChange {
    pub event: Event,
    pub handoff: Handoff,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingSeats {
    pub booking: Booking,
    pub seats: Vec<BookingSeat>,
    /// Места, назначенные прямо сейчас старой подтверждённой брони без мест.
    pub backfilled: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingSummary {
    #[serde(flatten)]
    pub booking: Booking,
    pub seat_numbers: Vec<i32>,
}

pub(crate) fn ensure_open(event: &Event) -> AppResult<()> {
    if event.status.accepts_bookings() {
        Ok(())
    } else {
        Err(AppError::conflict(format!(
            "event is {}, bookings are closed",
            event.status
        )))
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn event(&self, event_id: Uuid) -> AppResult<Event>;

    async fn seat_map(&self, event_id: Uuid) -> AppResult<SeatMap>;

    /// Меняет только поля вместимости. Новые места сначала предлагаются
    /// листу ожидания.
    async fn resize_capacity(
        &self,
        event_id: Uuid,
        total_slots: i32,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<CapacityChange>;

    async fn allocate(
        &self,
        request: &AllocationRequest,
        now: DateTime<Utc>,
    ) -> AppResult<AllocationOutcome>;

    async fn booking(&self, booking_id: Uuid) -> AppResult<Booking>;

    async fn booking_seats(&self, booking_id: Uuid, now: DateTime<Utc>) -> AppResult<BookingSeats>;

    async fn user_bookings(&self, user_id: Uuid) -> AppResult<Vec<BookingSummary>>;

    /// `seats = None` отменяет всю бронь.
    async fn cancel(
        &self,
        booking_id: Uuid,
        seats: Option<&[i32]>,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<CancelOutcome>;

    async fn join_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistJoin>;

    async fn waitlist_standing(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistStanding>;

    async fn confirm_offer(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<OfferConfirmation>;

    async fn expire_offer(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<OfferRelease>;

    async fn withdraw(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<OfferRelease>;

    /// Офферы с истёкшим дедлайном: (event_id, user_id).
    async fn lapsed_offers(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<(Uuid, Uuid)>>;
}

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ensure_open, AllocationOutcome, AllocationRequest, BookingSeats, BookingStore, BookingSummary,
    CancelOutcome, CapacityChange, Handoff, OfferConfirmation, OfferRelease, SeatOffer,
    WaitlistJoin, WaitlistStanding,
};
use crate::allocation::{free_seats, lowest_free_seat, SeatPlanner};
use crate::error::{AppError, AppResult};
use crate::models::{
    Booking, BookingSeat, BookingStatus, Event, EventStatus, SeatMap, SeatStatus, WaitlistEntry,
    WaitlistStatus,
};

#[derive(Debug, Clone, Default)]
struct State {
    events: HashMap<Uuid, Event>,
    bookings: HashMap<Uuid, Booking>,
    seats: Vec<BookingSeat>,
    waitlist: HashMap<(Uuid, Uuid), WaitlistEntry>,
}

impl State {
    fn event(&self, event_id: Uuid) -> AppResult<&Event> {
        self.events
            .get(&event_id)
            .ok_or_else(|| AppError::not_found("event"))
    }

    fn event_mut(&mut self, event_id: Uuid) -> AppResult<&mut Event> {
        self.events
            .get_mut(&event_id)
            .ok_or_else(|| AppError::not_found("event"))
    }

    fn booking(&self, booking_id: Uuid) -> AppResult<&Booking> {
        self.bookings
            .get(&booking_id)
            .ok_or_else(|| AppError::not_found("booking"))
    }

    fn entry_mut(&mut self, event_id: Uuid, user_id: Uuid) -> AppResult<&mut WaitlistEntry> {
        self.waitlist
            .get_mut(&(event_id, user_id))
            .ok_or_else(|| AppError::not_found("waitlist entry"))
    }

    fn taken(&self, event_id: Uuid) -> BTreeSet<i32> {
        self.seats
            .iter()
            .filter(|s| s.event_id == event_id && s.status == SeatStatus::Booked)
            .map(|s| s.seat_no)
            .collect()
    }

    fn shift_available(&mut self, event_id: Uuid, delta: i32, now: DateTime<Utc>) -> AppResult<i32> {
        let event = self.event_mut(event_id)?;
        let next = event.available_slots + delta;
        if next < 0 || next > event.total_slots {
            return Err(AppError::Transient(format!(
                "capacity counter would leave range: {} of {}",
                next, event.total_slots
            )));
        }
        event.available_slots = next;
        event.updated_at = now;
        Ok(next)
    }

    // Unique-индекс (event_id, seat_no) WHERE status = 'booked'
    fn insert_seat(
        &mut self,
        event_id: Uuid,
        booking_id: Uuid,
        user_id: Uuid,
        seat_no: i32,
        now: DateTime<Utc>,
    ) -> bool {
        let clash = self.seats.iter().any(|s| {
            s.event_id == event_id && s.seat_no == seat_no && s.status == SeatStatus::Booked
        });
        if clash {
            return false;
        }
        self.seats.push(BookingSeat {
            id: Uuid::new_v4(),
            event_id,
            booking_id: Some(booking_id),
            user_id,
            seat_no,
            status: SeatStatus::Booked,
            created_at: now,
        });
        true
    }

    fn assign_seats(
        &mut self,
        mut planner: SeatPlanner,
        event_id: Uuid,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<i32>> {
        while planner.remaining() > 0 {
            let seat = planner.next_candidate()?;
            if self.insert_seat(event_id, booking_id, user_id, seat, now) {
                planner.accept(seat);
            } else {
                planner.reject(seat)?;
            }
        }
        Ok(planner.into_assigned())
    }

    fn next_position(&self, event_id: Uuid) -> i32 {
        self.waitlist
            .values()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.position)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn enqueue(&mut self, event_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> WaitlistJoin {
        let position = self.next_position(event_id);
        match self.waitlist.get_mut(&(event_id, user_id)) {
            Some(entry) if entry.status.is_active() => WaitlistJoin {
                entry: entry.clone(),
                already_queued: true,
            },
            Some(entry) => {
                entry.rejoin(position, now);
                WaitlistJoin {
                    entry: entry.clone(),
                    already_queued: false,
                }
            }
            None => {
                let entry = WaitlistEntry::new(event_id, user_id, position, now);
                self.waitlist.insert((event_id, user_id), entry.clone());
                WaitlistJoin {
                    entry,
                    already_queued: false,
                }
            }
        }
    }

    fn oldest_waiting_booking(&self, event_id: Uuid, user_id: Uuid) -> Option<Uuid> {
        self.bookings
            .values()
            .filter(|b| {
                b.event_id == event_id && b.user_id == user_id && b.status == BookingStatus::Waiting
            })
            .min_by_key(|b| b.created_at)
            .map(|b| b.id)
    }

    fn live_offers(&self, event_id: Uuid, now: DateTime<Utc>) -> i32 {
        self.waitlist
            .values()
            .filter(|e| e.event_id == event_id && e.offer_is_live(now))
            .count() as i32
    }

    /// Свободные места, на которые ещё нет живого оффера.
    fn unclaimed(&self, event_id: Uuid, now: DateTime<Utc>) -> AppResult<i32> {
        Ok(self.event(event_id)?.available_slots - self.live_offers(event_id, now))
    }

    fn hand_over(
        &mut self,
        event_id: Uuid,
        hints: Vec<Option<i32>>,
        exclude: Option<Uuid>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<Handoff> {
        let mut handoff = Handoff::default();
        for seat_no in hints {
            let next = self
                .waitlist
                .values_mut()
                .filter(|e| {
                    e.event_id == event_id
                        && e.status == WaitlistStatus::Waiting
                        && Some(e.user_id) != exclude
                })
                .min_by_key(|e| e.position);
            match next {
                Some(entry) => {
                    let expires_at = entry.notify(now, window)?;
                    handoff.offers.push(SeatOffer {
                        event_id,
                        user_id: entry.user_id,
                        seat_no,
                        expires_at,
                    });
                }
                None => handoff.released.push(seat_no),
            }
        }
        Ok(handoff)
    }

    /// Одно место после снятого оффера: следующему в очереди или в общий `freed`.
    fn reoffer_one(
        &mut self,
        event_id: Uuid,
        exclude: Uuid,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<Handoff> {
        if self.unclaimed(event_id, now)? <= 0 {
            return Ok(Handoff::default());
        }
        let event = self.event(event_id)?;
        let hint = lowest_free_seat(&self.taken(event_id), event.total_slots);
        self.hand_over(event_id, vec![hint], Some(exclude), now, window)
    }

    fn allocate(
        &mut self,
        request: &AllocationRequest,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> AppResult<AllocationOutcome> {
        let event = self.event(request.event_id)?.clone();
        ensure_open(&event)?;

        if event.available_slots >= request.seats {
            let planner = SeatPlanner::new(
                self.taken(event.id),
                request.preferred.as_deref(),
                request.seats as usize,
                event.total_slots,
                max_attempts,
            )?;
            let booking = Booking {
                id: Uuid::new_v4(),
                event_id: event.id,
                user_id: request.user_id,
                seats: request.seats,
                status: BookingStatus::Confirmed,
                waitlist_position: None,
                created_at: now,
                updated_at: now,
            };
            let seats = self.assign_seats(planner, event.id, booking.id, request.user_id, now)?;
            let available = self.shift_available(event.id, -(seats.len() as i32), now)?;
            self.bookings.insert(booking.id, booking.clone());
            return Ok(AllocationOutcome::Confirmed {
                booking,
                seats,
                available,
            });
        }

        let join = self.enqueue(event.id, request.user_id, now);
        let existing = if join.already_queued {
            self.oldest_waiting_booking(event.id, request.user_id)
        } else {
            None
        };
        let booking = match existing {
            Some(id) => self.booking(id)?.clone(),
            None => {
                let booking = Booking {
                    id: Uuid::new_v4(),
                    event_id: event.id,
                    user_id: request.user_id,
                    seats: request.seats,
                    status: BookingStatus::Waiting,
                    waitlist_position: Some(join.entry.position),
                    created_at: now,
                    updated_at: now,
                };
                self.bookings.insert(booking.id, booking.clone());
                booking
            }
        };
        Ok(AllocationOutcome::Waitlisted {
            booking,
            position: join.entry.position,
            already_queued: join.already_queued,
        })
    }

    fn cancel(
        &mut self,
        booking_id: Uuid,
        only: Option<&[i32]>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<CancelOutcome> {
        let booking = self.booking(booking_id)?.clone();
        let event_id = booking.event_id;
        if booking.status == BookingStatus::Cancelled {
            return Ok(CancelOutcome {
                available: self.event(event_id)?.available_slots,
                booking,
                already_cancelled: true,
                freed: Vec::new(),
                handoff: Handoff::default(),
            });
        }

        let mut freed = Vec::new();
        for seat in self.seats.iter_mut().filter(|s| {
            s.booking_id == Some(booking_id)
                && s.status == SeatStatus::Booked
                && only.map_or(true, |list| list.contains(&s.seat_no))
        }) {
            seat.status = SeatStatus::Cancelled;
            freed.push(seat.seat_no);
        }
        freed.sort_unstable();

        let remaining = self
            .seats
            .iter()
            .any(|s| s.booking_id == Some(booking_id) && s.status == SeatStatus::Booked);
        let close_booking = only.is_none() || (!freed.is_empty() && !remaining);

        let mut handoff = Handoff::default();
        if close_booking {
            let was_waiting = booking.status == BookingStatus::Waiting;
            if let Some(b) = self.bookings.get_mut(&booking_id) {
                b.status = BookingStatus::Cancelled;
                b.updated_at = now;
            }
            if was_waiting && self.oldest_waiting_booking(event_id, booking.user_id).is_none() {
                let held_offer = self
                    .waitlist
                    .get_mut(&(event_id, booking.user_id))
                    .filter(|entry| entry.status.is_active())
                    .is_some_and(|entry| entry.withdraw(now));
                if held_offer {
                    handoff.extend(self.reoffer_one(event_id, booking.user_id, now, window)?);
                }
            }
        }

        let available = self.shift_available(event_id, freed.len() as i32, now)?;
        let hints = freed.iter().copied().map(Some).collect();
        handoff.extend(self.hand_over(event_id, hints, None, now, window)?);

        Ok(CancelOutcome {
            booking: self.booking(booking_id)?.clone(),
            already_cancelled: false,
            freed,
            handoff,
            available,
        })
    }

    fn confirm_offer(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> AppResult<OfferConfirmation> {
        let event = self.event(event_id)?.clone();
        let entry = self
            .waitlist
            .get_mut(&(event_id, user_id))
            .ok_or_else(|| AppError::OfferExpired("no offer for this user".into()))?;
        entry.confirm(now)?;
        if event.available_slots <= 0 {
            return Err(AppError::OfferExpired(
                "the offered seat has been taken in the meantime".into(),
            ));
        }

        let booking_id = match self.oldest_waiting_booking(event_id, user_id) {
            Some(id) => id,
            None => {
                let booking = Booking {
                    id: Uuid::new_v4(),
                    event_id,
                    user_id,
                    seats: 1,
                    status: BookingStatus::Confirmed,
                    waitlist_position: None,
                    created_at: now,
                    updated_at: now,
                };
                let id = booking.id;
                self.bookings.insert(id, booking);
                id
            }
        };
        if let Some(b) = self.bookings.get_mut(&booking_id) {
            b.status = BookingStatus::Confirmed;
            b.seats = 1;
            b.waitlist_position = None;
            b.updated_at = now;
        }

        let planner = SeatPlanner::new(self.taken(event_id), None, 1, event.total_slots, max_attempts)?;
        let seats = self.assign_seats(planner, event_id, booking_id, user_id, now)?;
        let seat_no = seats
            .first()
            .copied()
            .ok_or_else(|| AppError::Transient("no seat assigned".into()))?;
        let available = self.shift_available(event_id, -1, now)?;

        Ok(OfferConfirmation {
            booking: self.booking(booking_id)?.clone(),
            seat_no,
            available,
        })
    }

    fn resize(
        &mut self,
        event_id: Uuid,
        total_slots: i32,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<CapacityChange> {
        let taken = self.taken(event_id);
        let event = self.event(event_id)?.clone();
        // старые брони без строк мест учтены только в счётчике
        let booked = (taken.len() as i32).max(event.total_slots - event.available_slots);
        if total_slots < booked {
            return Err(AppError::conflict(format!(
                "cannot shrink below {} booked seats",
                booked
            )));
        }
        let grown = total_slots - event.total_slots;

        let event = {
            let event = self.event_mut(event_id)?;
            event.total_slots = total_slots;
            event.available_slots = total_slots - booked;
            event.updated_at = now;
            event.clone()
        };

        let handoff = if grown > 0 {
            let fresh = self.unclaimed(event_id, now)?.min(grown).max(0) as usize;
            let hints = free_seats(&taken, total_slots, fresh)
                .into_iter()
                .map(Some)
                .collect();
            self.hand_over(event_id, hints, None, now, window)?
        } else {
            Handoff::default()
        };
        Ok(CapacityChange { event, handoff })
    }
}

/// In-memory реализация `BookingStore`.
///
/// Один async-мьютекс на всё хранилище играет роль блокировки строки
/// события. Каждая операция работает над копией состояния и публикует её
/// только при успехе, так что ошибка посреди операции откатывает всё.
#[derive(Debug)]
pub struct MemoryBookingStore {
    state: Mutex<State>,
    max_attempts: u32,
}

impl Default for MemoryBookingStore {
    fn default() -> Self {
        Self::new(32)
    }
}

impl MemoryBookingStore {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_attempts,
        }
    }

    async fn transact<T>(&self, op: impl FnOnce(&mut State) -> AppResult<T>) -> AppResult<T> {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let out = op(&mut draft)?;
        *state = draft;
        Ok(out)
    }

    pub async fn insert_event(&self, total_slots: i32) -> Event {
        self.insert_event_with_status(total_slots, EventStatus::Upcoming)
            .await
    }

    pub async fn insert_event_with_status(&self, total_slots: i32, status: EventStatus) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            total_slots,
            available_slots: total_slots,
            status,
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .events
            .insert(event.id, event.clone());
        event
    }

    /// Подтверждённая бронь без строк мест, как в данных до появления нумерации.
    pub async fn insert_legacy_booking(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        seats: i32,
    ) -> AppResult<Booking> {
        self.transact(|state| {
            let now = Utc::now();
            state.shift_available(event_id, -seats, now)?;
            let booking = Booking {
                id: Uuid::new_v4(),
                event_id,
                user_id,
                seats,
                status: BookingStatus::Confirmed,
                waitlist_position: None,
                created_at: now,
                updated_at: now,
            };
            state.bookings.insert(booking.id, booking.clone());
            Ok(booking)
        })
        .await
    }

    pub async fn waitlist_entry(&self, event_id: Uuid, user_id: Uuid) -> Option<WaitlistEntry> {
        self.state
            .lock()
            .await
            .waitlist
            .get(&(event_id, user_id))
            .cloned()
    }

    pub async fn booked_seats(&self, event_id: Uuid) -> Vec<i32> {
        self.state.lock().await.taken(event_id).into_iter().collect()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn event(&self, event_id: Uuid) -> AppResult<Event> {
        self.state.lock().await.event(event_id).cloned()
    }

    async fn seat_map(&self, event_id: Uuid) -> AppResult<SeatMap> {
        let state = self.state.lock().await;
        let event = state.event(event_id)?;
        Ok(SeatMap {
            event_id,
            total: event.total_slots,
            available: event.available_slots,
            taken: state.taken(event_id).into_iter().collect(),
        })
    }

    async fn resize_capacity(
        &self,
        event_id: Uuid,
        total_slots: i32,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<CapacityChange> {
        self.transact(|state| state.resize(event_id, total_slots, now, offer_window))
            .await
    }

    async fn allocate(
        &self,
        request: &AllocationRequest,
        now: DateTime<Utc>,
    ) -> AppResult<AllocationOutcome> {
        let max_attempts = self.max_attempts;
        self.transact(|state| state.allocate(request, now, max_attempts))
            .await
    }

    async fn booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.state.lock().await.booking(booking_id).cloned()
    }

    async fn booking_seats(&self, booking_id: Uuid, now: DateTime<Utc>) -> AppResult<BookingSeats> {
        let max_attempts = self.max_attempts;
        self.transact(|state| {
            let booking = state.booking(booking_id)?.clone();
            let has_rows = state.seats.iter().any(|s| s.booking_id == Some(booking_id));

            let mut backfilled = Vec::new();
            if booking.status == BookingStatus::Confirmed && !has_rows {
                let event = state.event(booking.event_id)?.clone();
                let planner = SeatPlanner::new(
                    state.taken(event.id),
                    None,
                    booking.seats.max(0) as usize,
                    event.total_slots,
                    max_attempts,
                )?;
                backfilled =
                    state.assign_seats(planner, event.id, booking_id, booking.user_id, now)?;
            }

            let mut seats: Vec<BookingSeat> = state
                .seats
                .iter()
                .filter(|s| s.booking_id == Some(booking_id))
                .cloned()
                .collect();
            seats.sort_by_key(|s| s.seat_no);
            Ok(BookingSeats {
                booking,
                seats,
                backfilled,
            })
        })
        .await
    }

    async fn user_bookings(&self, user_id: Uuid) -> AppResult<Vec<BookingSummary>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id && b.status != BookingStatus::Cancelled)
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(bookings
            .into_iter()
            .map(|booking| {
                let mut seat_numbers: Vec<i32> = state
                    .seats
                    .iter()
                    .filter(|s| s.booking_id == Some(booking.id) && s.status == SeatStatus::Booked)
                    .map(|s| s.seat_no)
                    .collect();
                seat_numbers.sort_unstable();
                BookingSummary {
                    booking: booking.clone(),
                    seat_numbers,
                }
            })
            .collect())
    }

    async fn cancel(
        &self,
        booking_id: Uuid,
        seats: Option<&[i32]>,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<CancelOutcome> {
        self.transact(|state| state.cancel(booking_id, seats, now, offer_window))
            .await
    }

    async fn join_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistJoin> {
        self.transact(|state| {
            let event = state.event(event_id)?;
            ensure_open(event)?;
            let already_active = state
                .waitlist
                .get(&(event_id, user_id))
                .is_some_and(|e| e.status.is_active());
            if event.available_slots > 0 && !already_active {
                return Err(AppError::conflict(
                    "event still has available seats, book directly",
                ));
            }
            Ok(state.enqueue(event_id, user_id, now))
        })
        .await
    }

    async fn waitlist_standing(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistStanding> {
        let state = self.state.lock().await;
        let entry = state
            .waitlist
            .get(&(event_id, user_id))
            .ok_or_else(|| AppError::not_found("waitlist entry"))?;
        let active: Vec<&WaitlistEntry> = state
            .waitlist
            .values()
            .filter(|e| e.event_id == event_id && e.status.is_active())
            .collect();
        Ok(WaitlistStanding {
            event_id,
            user_id,
            position: entry.position,
            status: entry.effective_status(now),
            expires_at: entry.expires_at,
            total_on_waitlist: active.len() as i64,
            ahead: active.iter().filter(|e| e.position < entry.position).count() as i64,
        })
    }

    async fn confirm_offer(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<OfferConfirmation> {
        let max_attempts = self.max_attempts;
        self.transact(|state| state.confirm_offer(event_id, user_id, now, max_attempts))
            .await
    }

    async fn expire_offer(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<OfferRelease> {
        self.transact(|state| {
            state.event(event_id)?;
            let entry = state.entry_mut(event_id, user_id)?;
            entry.lapse(now)?;
            let entry = entry.clone();
            let handoff = state.reoffer_one(event_id, user_id, now, offer_window)?;
            Ok(OfferRelease {
                entry,
                handoff,
                available: state.event(event_id)?.available_slots,
            })
        })
        .await
    }

    async fn withdraw(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<OfferRelease> {
        self.transact(|state| {
            state.event(event_id)?;
            let entry = state.entry_mut(event_id, user_id)?;
            let held_offer = !entry.status.is_terminal() && entry.withdraw(now);
            let entry = entry.clone();
            let handoff = if held_offer {
                state.reoffer_one(event_id, user_id, now, offer_window)?
            } else {
                Handoff::default()
            };
            Ok(OfferRelease {
                entry,
                handoff,
                available: state.event(event_id)?.available_slots,
            })
        })
        .await
    }

    async fn lapsed_offers(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<(Uuid, Uuid)>> {
        let state = self.state.lock().await;
        let mut lapsed: Vec<&WaitlistEntry> = state
            .waitlist
            .values()
            .filter(|e| e.effective_status(now) == WaitlistStatus::Expired)
            .collect();
        lapsed.sort_by_key(|e| e.expires_at);
        Ok(lapsed
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|e| (e.event_id, e.user_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Duration {
        Duration::seconds(5)
    }

    fn request(event_id: Uuid, seats: i32, preferred: Option<Vec<i32>>) -> AllocationRequest {
        AllocationRequest {
            event_id,
            user_id: Uuid::new_v4(),
            seats,
            preferred,
        }
    }

    #[tokio::test]
    async fn failed_allocation_leaves_no_trace() {
        let store = MemoryBookingStore::new(32);
        let event = store.insert_event(3).await;
        store
            .allocate(&request(event.id, 1, Some(vec![2])), Utc::now())
            .await
            .unwrap();

        let err = store
            .allocate(&request(event.id, 2, Some(vec![3, 2])), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { ref seats, .. } if seats == &vec![2]));
        assert_eq!(store.booked_seats(event.id).await, vec![2]);
        assert_eq!(store.event(event.id).await.unwrap().available_slots, 2);
    }

    #[tokio::test]
    async fn closed_event_rejects_bookings() {
        let store = MemoryBookingStore::new(32);
        let event = store.insert_event_with_status(5, EventStatus::Cancelled).await;
        let err = store
            .allocate(&request(event.id, 1, None), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn cancelling_twice_is_a_no_op() {
        let store = MemoryBookingStore::new(32);
        let event = store.insert_event(2).await;
        let AllocationOutcome::Confirmed { booking, .. } = store
            .allocate(&request(event.id, 2, None), Utc::now())
            .await
            .unwrap()
        else {
            panic!("expected confirmed booking");
        };

        let first = store.cancel(booking.id, None, Utc::now(), window()).await.unwrap();
        assert_eq!(first.freed, vec![1, 2]);
        assert_eq!(first.handoff.released, vec![Some(1), Some(2)]);

        let second = store.cancel(booking.id, None, Utc::now(), window()).await.unwrap();
        assert!(second.already_cancelled);
        assert!(second.freed.is_empty());
        assert_eq!(second.available, 2);
    }

    #[tokio::test]
    async fn shrinking_below_booked_count_is_refused() {
        let store = MemoryBookingStore::new(32);
        let event = store.insert_event(4).await;
        store
            .allocate(&request(event.id, 3, None), Utc::now())
            .await
            .unwrap();

        let err = store
            .resize_capacity(event.id, 2, Utc::now(), window())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        let change = store
            .resize_capacity(event.id, 3, Utc::now(), window())
            .await
            .unwrap();
        assert_eq!(change.event.available_slots, 0);
    }

    #[tokio::test]
    async fn rejoin_after_confirmation_goes_to_the_back() {
        let store = MemoryBookingStore::new(32);
        let event = store.insert_event(1).await;
        store
            .allocate(&request(event.id, 1, None), Utc::now())
            .await
            .unwrap();

        let user = Uuid::new_v4();
        let now = Utc::now();
        let first = store.join_waitlist(event.id, user, now).await.unwrap();
        assert_eq!(first.entry.position, 1);
        let again = store.join_waitlist(event.id, user, now).await.unwrap();
        assert!(again.already_queued);
        assert_eq!(again.entry.position, 1);

        store.join_waitlist(event.id, Uuid::new_v4(), now).await.unwrap();
        store.withdraw(event.id, user, now, window()).await.unwrap();
        let back = store.join_waitlist(event.id, user, now).await.unwrap();
        assert!(!back.already_queued);
        assert_eq!(back.entry.position, 3);
    }

    #[tokio::test]
    async fn lapsed_offers_are_listed_oldest_first() {
        let store = MemoryBookingStore::new(32);
        let event = store.insert_event(2).await;
        let AllocationOutcome::Confirmed { booking, .. } = store
            .allocate(&request(event.id, 2, None), Utc::now())
            .await
            .unwrap()
        else {
            panic!("expected confirmed booking");
        };
        let now = Utc::now();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        store.join_waitlist(event.id, u1, now).await.unwrap();
        store.join_waitlist(event.id, u2, now).await.unwrap();

        store.cancel(booking.id, Some(&[1]), now, window()).await.unwrap();
        store
            .cancel(booking.id, Some(&[2]), now + Duration::seconds(1), window())
            .await
            .unwrap();

        assert!(store.lapsed_offers(now + Duration::seconds(4), 10).await.unwrap().is_empty());
        let lapsed = store.lapsed_offers(now + Duration::seconds(7), 10).await.unwrap();
        assert_eq!(lapsed, vec![(event.id, u1), (event.id, u2)]);
    }
}

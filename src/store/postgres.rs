use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{
    ensure_open, AllocationOutcome, AllocationRequest, BookingSeats, BookingStore, BookingSummary,
    CancelOutcome, CapacityChange, Handoff, OfferConfirmation, OfferRelease, SeatOffer,
    WaitlistJoin, WaitlistStanding,
};
use crate::allocation::{free_seats, lowest_free_seat, SeatPlanner};
use crate::error::{AppError, AppResult};
use crate::models::{Booking, BookingSeat, BookingStatus, Event, SeatMap, WaitlistEntry};

/* ---------- rows ---------- */

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    total_slots: i32,
    available_slots: i32,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = AppError;

    fn try_from(row: EventRow) -> AppResult<Self> {
        Ok(Event {
            id: row.id,
            total_slots: row.total_slots,
            available_slots: row.available_slots,
            status: row.status.parse()?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    seats: i32,
    status: String,
    waitlist_position: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = AppError;

    fn try_from(row: BookingRow) -> AppResult<Self> {
        Ok(Booking {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            seats: row.seats,
            status: row.status.parse()?,
            waitlist_position: row.waitlist_position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SeatRow {
    id: Uuid,
    event_id: Uuid,
    booking_id: Option<Uuid>,
    user_id: Uuid,
    seat_no: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SeatRow> for BookingSeat {
    type Error = AppError;

    fn try_from(row: SeatRow) -> AppResult<Self> {
        Ok(BookingSeat {
            id: row.id,
            event_id: row.event_id,
            booking_id: row.booking_id,
            user_id: row.user_id,
            seat_no: row.seat_no,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    position: i32,
    status: String,
    notified_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for WaitlistEntry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> AppResult<Self> {
        Ok(WaitlistEntry {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            position: row.position,
            status: row.status.parse()?,
            notified_at: row.notified_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const EVENT_COLUMNS: &str = "id, total_slots, available_slots, status, updated_at";
const BOOKING_COLUMNS: &str =
    "id, event_id, user_id, seats, status, waitlist_position, created_at, updated_at";
const SEAT_COLUMNS: &str = "id, event_id, booking_id, user_id, seat_no, status, created_at";
const ENTRY_COLUMNS: &str =
    "id, event_id, user_id, position, status, notified_at, expires_at, created_at, updated_at";

/* ---------- helpers (все вызываются внутри транзакции) ---------- */

async fn lock_event(conn: &mut PgConnection, event_id: Uuid) -> AppResult<Event> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {} FROM events WHERE id = $1 FOR UPDATE",
        EVENT_COLUMNS
    ))
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.ok_or_else(|| AppError::not_found("event"))?.try_into()
}

async fn read_booking(conn: &mut PgConnection, booking_id: Uuid, lock: bool) -> AppResult<Booking> {
    let sql = format!(
        "SELECT {} FROM bookings WHERE id = $1{}",
        BOOKING_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, BookingRow>(&sql)
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.ok_or_else(|| AppError::not_found("booking"))?.try_into()
}

async fn lock_entry(
    conn: &mut PgConnection,
    event_id: Uuid,
    user_id: Uuid,
) -> AppResult<Option<WaitlistEntry>> {
    let row = sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {} FROM waitlist_entries WHERE event_id = $1 AND user_id = $2 FOR UPDATE",
        ENTRY_COLUMNS
    ))
    .bind(event_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(WaitlistEntry::try_from).transpose()
}

async fn taken_seats(conn: &mut PgConnection, event_id: Uuid) -> AppResult<BTreeSet<i32>> {
    let seats = sqlx::query_scalar::<_, i32>(
        "SELECT seat_no FROM booking_seats WHERE event_id = $1 AND status = 'booked'",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(seats.into_iter().collect())
}

async fn shift_available(
    conn: &mut PgConnection,
    event_id: Uuid,
    delta: i32,
    now: DateTime<Utc>,
) -> AppResult<i32> {
    // CHECK (0 <= available_slots <= total_slots) в схеме отклонит выход за границы
    let available = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE events
        SET available_slots = available_slots + $2, updated_at = $3
        WHERE id = $1
        RETURNING available_slots
        "#,
    )
    .bind(event_id)
    .bind(delta)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(available)
}

async fn insert_booking(conn: &mut PgConnection, booking: &Booking) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO bookings (id, event_id, user_id, seats, status, waitlist_position, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(booking.id)
    .bind(booking.event_id)
    .bind(booking.user_id)
    .bind(booking.seats)
    .bind(booking.status.as_str())
    .bind(booking.waitlist_position)
    .bind(booking.created_at)
    .bind(booking.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Нарушение уникальности прерывает транзакцию Postgres, поэтому конфликт
/// обрабатывается через ON CONFLICT DO NOTHING: пустой RETURNING значит
/// «место уже занято».
async fn insert_seat(
    conn: &mut PgConnection,
    event_id: Uuid,
    booking_id: Uuid,
    user_id: Uuid,
    seat_no: i32,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO booking_seats (id, event_id, booking_id, user_id, seat_no, status, created_at)
        VALUES ($1, $2, $3, $4, $5, 'booked', $6)
        ON CONFLICT (event_id, seat_no) WHERE status = 'booked' DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event_id)
    .bind(booking_id)
    .bind(user_id)
    .bind(seat_no)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(inserted.is_some())
}

async fn assign_seats(
    conn: &mut PgConnection,
    mut planner: SeatPlanner,
    event_id: Uuid,
    booking_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<Vec<i32>> {
    while planner.remaining() > 0 {
        let seat = planner.next_candidate()?;
        if insert_seat(conn, event_id, booking_id, user_id, seat, now).await? {
            planner.accept(seat);
        } else {
            tracing::debug!(%event_id, seat, "seat taken concurrently, retrying");
            planner.reject(seat)?;
        }
    }
    Ok(planner.into_assigned())
}

async fn save_entry(conn: &mut PgConnection, entry: &WaitlistEntry) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE waitlist_entries
        SET position = $2, status = $3, notified_at = $4, expires_at = $5, updated_at = $6
        WHERE id = $1
        "#,
    )
    .bind(entry.id)
    .bind(entry.position)
    .bind(entry.status.as_str())
    .bind(entry.notified_at)
    .bind(entry.expires_at)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn enqueue(
    conn: &mut PgConnection,
    event_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<WaitlistJoin> {
    let existing = lock_entry(conn, event_id, user_id).await?;
    if let Some(entry) = existing.as_ref().filter(|e| e.status.is_active()) {
        return Ok(WaitlistJoin {
            entry: entry.clone(),
            already_queued: true,
        });
    }

    // Монотонность позиции держится на блокировке строки события
    let position = sqlx::query_scalar::<_, i32>(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM waitlist_entries WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_one(&mut *conn)
    .await?;

    let entry = match existing {
        Some(mut entry) => {
            entry.rejoin(position, now);
            save_entry(conn, &entry).await?;
            entry
        }
        None => {
            let entry = WaitlistEntry::new(event_id, user_id, position, now);
            sqlx::query(
                r#"
                INSERT INTO waitlist_entries (id, event_id, user_id, position, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $6)
                "#,
            )
            .bind(entry.id)
            .bind(event_id)
            .bind(user_id)
            .bind(position)
            .bind(entry.status.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await?;
            entry
        }
    };
    Ok(WaitlistJoin {
        entry,
        already_queued: false,
    })
}

async fn oldest_waiting_booking(
    conn: &mut PgConnection,
    event_id: Uuid,
    user_id: Uuid,
) -> AppResult<Option<Booking>> {
    let row = sqlx::query_as::<_, BookingRow>(&format!(
        r#"
        SELECT {} FROM bookings
        WHERE event_id = $1 AND user_id = $2 AND status = 'waiting'
        ORDER BY created_at ASC
        LIMIT 1
        FOR UPDATE
        "#,
        BOOKING_COLUMNS
    ))
    .bind(event_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(Booking::try_from).transpose()
}

async fn unclaimed(conn: &mut PgConnection, event: &Event, now: DateTime<Utc>) -> AppResult<i32> {
    let live = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM waitlist_entries
        WHERE event_id = $1 AND status = 'notified' AND expires_at > $2
        "#,
    )
    .bind(event.id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(event.available_slots - live as i32)
}

async fn hand_over(
    conn: &mut PgConnection,
    event_id: Uuid,
    hints: Vec<Option<i32>>,
    exclude: Option<Uuid>,
    now: DateTime<Utc>,
    window: Duration,
) -> AppResult<Handoff> {
    let mut handoff = Handoff::default();
    for seat_no in hints {
        let next = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            SELECT {} FROM waitlist_entries
            WHERE event_id = $1 AND status = 'waiting'
              AND ($2::uuid IS NULL OR user_id <> $2)
            ORDER BY position ASC
            LIMIT 1
            FOR UPDATE
            "#,
            ENTRY_COLUMNS
        ))
        .bind(event_id)
        .bind(exclude)
        .fetch_optional(&mut *conn)
        .await?;

        match next {
            Some(row) => {
                let mut entry = WaitlistEntry::try_from(row)?;
                let expires_at = entry.notify(now, window)?;
                save_entry(conn, &entry).await?;
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

async fn reoffer_one(
    conn: &mut PgConnection,
    event: &Event,
    exclude: Uuid,
    now: DateTime<Utc>,
    window: Duration,
) -> AppResult<Handoff> {
    if unclaimed(conn, event, now).await? <= 0 {
        return Ok(Handoff::default());
    }
    let taken = taken_seats(conn, event.id).await?;
    let hint = lowest_free_seat(&taken, event.total_slots);
    hand_over(conn, event.id, vec![hint], Some(exclude), now, window).await
}

/* ---------- store ---------- */

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
    max_attempts: u32,
}

impl PgBookingStore {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self { pool, max_attempts }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn event(&self, event_id: Uuid) -> AppResult<Event> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| AppError::not_found("event"))?.try_into()
    }

    async fn seat_map(&self, event_id: Uuid) -> AppResult<SeatMap> {
        let event = self.event(event_id).await?;
        let taken = sqlx::query_scalar::<_, i32>(
            "SELECT seat_no FROM booking_seats WHERE event_id = $1 AND status = 'booked' ORDER BY seat_no",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(SeatMap {
            event_id,
            total: event.total_slots,
            available: event.available_slots,
            taken,
        })
    }

    async fn resize_capacity(
        &self,
        event_id: Uuid,
        total_slots: i32,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<CapacityChange> {
        let mut tx = self.pool.begin().await?;
        let before = lock_event(&mut tx, event_id).await?;
        let taken = taken_seats(&mut tx, event_id).await?;
        // старые брони без строк мест учтены только в счётчике
        let booked = (taken.len() as i32).max(before.total_slots - before.available_slots);
        if total_slots < booked {
            return Err(AppError::conflict(format!(
                "cannot shrink below {} booked seats",
                booked
            )));
        }

        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            UPDATE events
            SET total_slots = $2, available_slots = $3, updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .bind(total_slots)
        .bind(total_slots - booked)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let event = Event::try_from(row)?;

        let grown = total_slots - before.total_slots;
        let handoff = if grown > 0 {
            let fresh = unclaimed(&mut tx, &event, now).await?.min(grown).max(0) as usize;
            let hints = free_seats(&taken, total_slots, fresh)
                .into_iter()
                .map(Some)
                .collect();
            hand_over(&mut tx, event_id, hints, None, now, offer_window).await?
        } else {
            Handoff::default()
        };

        tx.commit().await?;
        Ok(CapacityChange { event, handoff })
    }

    async fn allocate(
        &self,
        request: &AllocationRequest,
        now: DateTime<Utc>,
    ) -> AppResult<AllocationOutcome> {
        let mut tx = self.pool.begin().await?;
        let event = lock_event(&mut tx, request.event_id).await?;
        ensure_open(&event)?;

        if event.available_slots >= request.seats {
            let taken = taken_seats(&mut tx, event.id).await?;
            let planner = SeatPlanner::new(
                taken,
                request.preferred.as_deref(),
                request.seats as usize,
                event.total_slots,
                self.max_attempts,
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
            insert_booking(&mut tx, &booking).await?;
            let seats =
                assign_seats(&mut tx, planner, event.id, booking.id, request.user_id, now).await?;
            let available = shift_available(&mut tx, event.id, -(seats.len() as i32), now).await?;
            tx.commit().await?;
            return Ok(AllocationOutcome::Confirmed {
                booking,
                seats,
                available,
            });
        }

        let join = enqueue(&mut tx, event.id, request.user_id, now).await?;
        let existing = if join.already_queued {
            oldest_waiting_booking(&mut tx, event.id, request.user_id).await?
        } else {
            None
        };
        let booking = match existing {
            Some(booking) => booking,
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
                insert_booking(&mut tx, &booking).await?;
                booking
            }
        };
        tx.commit().await?;
        Ok(AllocationOutcome::Waitlisted {
            booking,
            position: join.entry.position,
            already_queued: join.already_queued,
        })
    }

    async fn booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        let mut conn = self.pool.acquire().await?;
        read_booking(&mut conn, booking_id, false).await
    }

    async fn booking_seats(&self, booking_id: Uuid, now: DateTime<Utc>) -> AppResult<BookingSeats> {
        let mut tx = self.pool.begin().await?;
        let event_id = read_booking(&mut tx, booking_id, false).await?.event_id;
        let event = lock_event(&mut tx, event_id).await?;
        let booking = read_booking(&mut tx, booking_id, true).await?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM booking_seats WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut backfilled = Vec::new();
        if booking.status == BookingStatus::Confirmed && count == 0 {
            let taken = taken_seats(&mut tx, event.id).await?;
            let planner = SeatPlanner::new(
                taken,
                None,
                booking.seats.max(0) as usize,
                event.total_slots,
                self.max_attempts,
            )?;
            backfilled =
                assign_seats(&mut tx, planner, event.id, booking.id, booking.user_id, now).await?;
            tracing::info!(%booking_id, seats = ?backfilled, "backfilled seats for legacy booking");
        }

        let rows = sqlx::query_as::<_, SeatRow>(&format!(
            "SELECT {} FROM booking_seats WHERE booking_id = $1 ORDER BY seat_no",
            SEAT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let seats = rows
            .into_iter()
            .map(BookingSeat::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(BookingSeats {
            booking,
            seats,
            backfilled,
        })
    }

    async fn user_bookings(&self, user_id: Uuid) -> AppResult<Vec<BookingSummary>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            SELECT {} FROM bookings
            WHERE user_id = $1 AND status <> 'cancelled'
            ORDER BY created_at DESC
            "#,
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let bookings = rows
            .into_iter()
            .map(Booking::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        let ids: Vec<Uuid> = bookings.iter().map(|b| b.id).collect();
        let seats: Vec<(Uuid, i32)> = sqlx::query_as(
            r#"
            SELECT booking_id, seat_no FROM booking_seats
            WHERE booking_id = ANY($1) AND status = 'booked'
            ORDER BY seat_no
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings
            .into_iter()
            .map(|booking| BookingSummary {
                seat_numbers: seats
                    .iter()
                    .filter(|(id, _)| *id == booking.id)
                    .map(|(_, seat)| *seat)
                    .collect(),
                booking,
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
        let mut tx = self.pool.begin().await?;
        let event_id = read_booking(&mut tx, booking_id, false).await?.event_id;
        let event = lock_event(&mut tx, event_id).await?;
        let booking = read_booking(&mut tx, booking_id, true).await?;

        if booking.status == BookingStatus::Cancelled {
            tx.commit().await?;
            return Ok(CancelOutcome {
                booking,
                already_cancelled: true,
                freed: Vec::new(),
                handoff: Handoff::default(),
                available: event.available_slots,
            });
        }

        let mut freed = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE booking_seats SET status = 'cancelled'
            WHERE booking_id = $1 AND status = 'booked'
              AND ($2::int[] IS NULL OR seat_no = ANY($2))
            RETURNING seat_no
            "#,
        )
        .bind(booking_id)
        .bind(seats.map(<[i32]>::to_vec))
        .fetch_all(&mut *tx)
        .await?;
        freed.sort_unstable();

        let remaining = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM booking_seats WHERE booking_id = $1 AND status = 'booked')",
        )
        .bind(booking_id)
        .fetch_one(&mut *tx)
        .await?;
        let close_booking = seats.is_none() || (!freed.is_empty() && !remaining);

        let mut handoff = Handoff::default();
        let mut booking = booking;
        if close_booking {
            let was_waiting = booking.status == BookingStatus::Waiting;
            sqlx::query("UPDATE bookings SET status = 'cancelled', updated_at = $2 WHERE id = $1")
                .bind(booking_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            booking.status = BookingStatus::Cancelled;
            booking.updated_at = now;

            if was_waiting
                && oldest_waiting_booking(&mut tx, event_id, booking.user_id)
                    .await?
                    .is_none()
            {
                if let Some(mut entry) = lock_entry(&mut tx, event_id, booking.user_id).await? {
                    if entry.status.is_active() {
                        let held_offer = entry.withdraw(now);
                        save_entry(&mut tx, &entry).await?;
                        if held_offer {
                            handoff.extend(
                                reoffer_one(&mut tx, &event, booking.user_id, now, offer_window)
                                    .await?,
                            );
                        }
                    }
                }
            }
        }

        let available = if freed.is_empty() {
            event.available_slots
        } else {
            shift_available(&mut tx, event_id, freed.len() as i32, now).await?
        };
        let hints = freed.iter().copied().map(Some).collect();
        handoff.extend(hand_over(&mut tx, event_id, hints, None, now, offer_window).await?);

        tx.commit().await?;
        Ok(CancelOutcome {
            booking,
            already_cancelled: false,
            freed,
            handoff,
            available,
        })
    }

    async fn join_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistJoin> {
        let mut tx = self.pool.begin().await?;
        let event = lock_event(&mut tx, event_id).await?;
        ensure_open(&event)?;
        if event.available_slots > 0 {
            let active = lock_entry(&mut tx, event_id, user_id)
                .await?
                .is_some_and(|e| e.status.is_active());
            if !active {
                return Err(AppError::conflict(
                    "event still has available seats, book directly",
                ));
            }
        }
        let join = enqueue(&mut tx, event_id, user_id, now).await?;
        tx.commit().await?;
        Ok(join)
    }

    async fn waitlist_standing(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistStanding> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM waitlist_entries WHERE event_id = $1 AND user_id = $2",
            ENTRY_COLUMNS
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let entry = WaitlistEntry::try_from(row.ok_or_else(|| AppError::not_found("waitlist entry"))?)?;

        let (total, ahead): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE position < $2)
            FROM waitlist_entries
            WHERE event_id = $1 AND status IN ('waiting', 'notified')
            "#,
        )
        .bind(event_id)
        .bind(entry.position)
        .fetch_one(&self.pool)
        .await?;

        Ok(WaitlistStanding {
            event_id,
            user_id,
            position: entry.position,
            status: entry.effective_status(now),
            expires_at: entry.expires_at,
            total_on_waitlist: total,
            ahead,
        })
    }

    async fn confirm_offer(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<OfferConfirmation> {
        let mut tx = self.pool.begin().await?;
        let event = lock_event(&mut tx, event_id).await?;
        let mut entry = lock_entry(&mut tx, event_id, user_id)
            .await?
            .ok_or_else(|| AppError::OfferExpired("no offer for this user".into()))?;
        entry.confirm(now)?;
        if event.available_slots <= 0 {
            return Err(AppError::OfferExpired(
                "the offered seat has been taken in the meantime".into(),
            ));
        }
        save_entry(&mut tx, &entry).await?;

        let booking = match oldest_waiting_booking(&mut tx, event_id, user_id).await? {
            Some(mut booking) => {
                booking.status = BookingStatus::Confirmed;
                booking.seats = 1;
                booking.waitlist_position = None;
                booking.updated_at = now;
                sqlx::query(
                    r#"
                    UPDATE bookings
                    SET status = 'confirmed', seats = 1, waitlist_position = NULL, updated_at = $2
                    WHERE id = $1
                    "#,
                )
                .bind(booking.id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                booking
            }
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
                insert_booking(&mut tx, &booking).await?;
                booking
            }
        };

        let taken = taken_seats(&mut tx, event_id).await?;
        let planner = SeatPlanner::new(taken, None, 1, event.total_slots, self.max_attempts)?;
        let seats = assign_seats(&mut tx, planner, event_id, booking.id, user_id, now).await?;
        let seat_no = seats
            .first()
            .copied()
            .ok_or_else(|| AppError::Transient("no seat assigned".into()))?;
        let available = shift_available(&mut tx, event_id, -1, now).await?;

        tx.commit().await?;
        Ok(OfferConfirmation {
            booking,
            seat_no,
            available,
        })
    }

    async fn expire_offer(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<OfferRelease> {
        let mut tx = self.pool.begin().await?;
        let event = lock_event(&mut tx, event_id).await?;
        let mut entry = lock_entry(&mut tx, event_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("waitlist entry"))?;
        entry.lapse(now)?;
        save_entry(&mut tx, &entry).await?;

        let handoff = reoffer_one(&mut tx, &event, user_id, now, offer_window).await?;
        tx.commit().await?;
        Ok(OfferRelease {
            entry,
            handoff,
            available: event.available_slots,
        })
    }

    async fn withdraw(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        offer_window: Duration,
    ) -> AppResult<OfferRelease> {
        let mut tx = self.pool.begin().await?;
        let event = lock_event(&mut tx, event_id).await?;
        let mut entry = lock_entry(&mut tx, event_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("waitlist entry"))?;

        let mut handoff = Handoff::default();
        if !entry.status.is_terminal() {
            let held_offer = entry.withdraw(now);
            save_entry(&mut tx, &entry).await?;
            if held_offer {
                handoff = reoffer_one(&mut tx, &event, user_id, now, offer_window).await?;
            }
        }
        tx.commit().await?;
        Ok(OfferRelease {
            entry,
            handoff,
            available: event.available_slots,
        })
    }

    async fn lapsed_offers(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<(Uuid, Uuid)>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT event_id, user_id FROM waitlist_entries
            WHERE status = 'notified' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

//! Проверки на живом Postgres: `DATABASE_URL=... cargo test -- --ignored`.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use seat_booking::error::AppError;
use seat_booking::models::{BookingStatus, WaitlistStatus};
use seat_booking::store::{AllocationOutcome, AllocationRequest, BookingStore, PgBookingStore};

async fn seed_event(pool: &PgPool, total_slots: i32) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO events (id, total_slots, available_slots) VALUES ($1, $2, $2)")
        .bind(id)
        .bind(total_slots)
        .execute(pool)
        .await
        .unwrap();
    id
}

fn ask(event_id: Uuid, seats: i32, preferred: Option<Vec<i32>>) -> AllocationRequest {
    AllocationRequest {
        event_id,
        user_id: Uuid::new_v4(),
        seats,
        preferred,
    }
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore]
async fn concurrent_allocations_never_oversell(pool: PgPool) {
    let event_id = seed_event(&pool, 10).await;
    let store = Arc::new(PgBookingStore::new(pool.clone(), 32));

    let mut tasks = Vec::new();
    for _ in 0..30 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.allocate(&ask(event_id, 1, None), Utc::now()).await
        }));
    }
    let mut confirmed = 0;
    for task in tasks {
        if let AllocationOutcome::Confirmed { .. } = task.await.unwrap().unwrap() {
            confirmed += 1;
        }
    }
    assert_eq!(confirmed, 10);

    let map = store.seat_map(event_id).await.unwrap();
    assert_eq!(map.available, 0);
    assert_eq!(map.taken, (1..=10).collect::<Vec<_>>());
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore]
async fn rejected_preferred_seat_rolls_back_everything(pool: PgPool) {
    let event_id = seed_event(&pool, 3).await;
    let store = PgBookingStore::new(pool.clone(), 32);
    store.allocate(&ask(event_id, 1, Some(vec![2])), Utc::now()).await.unwrap();

    let err = store
        .allocate(&ask(event_id, 2, Some(vec![2, 3])), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { ref seats, .. } if seats == &vec![2]));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM booking_seats WHERE event_id = $1")
        .bind(event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(store.event(event_id).await.unwrap().available_slots, 2);
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore]
async fn cancellation_offers_the_seat_and_confirmation_takes_it(pool: PgPool) {
    let event_id = seed_event(&pool, 1).await;
    let store = PgBookingStore::new(pool.clone(), 32);
    let window = Duration::seconds(5);
    let now = Utc::now();

    let first = match store.allocate(&ask(event_id, 1, None), now).await.unwrap() {
        AllocationOutcome::Confirmed { booking, .. } => booking,
        other => panic!("expected confirmation, got {:?}", other),
    };
    let waiter = ask(event_id, 1, None);
    let queued = store.allocate(&waiter, now).await.unwrap();
    assert!(matches!(queued, AllocationOutcome::Waitlisted { position: 1, .. }));

    let cancel = store.cancel(first.id, None, now, window).await.unwrap();
    assert_eq!(cancel.freed, vec![1]);
    assert_eq!(cancel.handoff.offers.len(), 1);
    assert_eq!(cancel.handoff.offers[0].user_id, waiter.user_id);

    let standing = store
        .waitlist_standing(event_id, waiter.user_id, now)
        .await
        .unwrap();
    assert_eq!(standing.status, WaitlistStatus::Notified);

    let confirmation = store
        .confirm_offer(event_id, waiter.user_id, now + Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(confirmation.seat_no, 1);
    assert_eq!(confirmation.available, 0);
    assert_eq!(confirmation.booking.status, BookingStatus::Confirmed);
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore]
async fn lapsed_offer_is_listed_and_requeued(pool: PgPool) {
    let event_id = seed_event(&pool, 1).await;
    let store = PgBookingStore::new(pool.clone(), 32);
    let window = Duration::seconds(5);
    let now = Utc::now();

    let first = match store.allocate(&ask(event_id, 1, None), now).await.unwrap() {
        AllocationOutcome::Confirmed { booking, .. } => booking,
        other => panic!("expected confirmation, got {:?}", other),
    };
    let waiter = ask(event_id, 1, None);
    store.allocate(&waiter, now).await.unwrap();
    store.cancel(first.id, None, now, window).await.unwrap();

    let later = now + Duration::seconds(6);
    assert_eq!(
        store.lapsed_offers(later, 10).await.unwrap(),
        vec![(event_id, waiter.user_id)]
    );
    let release = store
        .expire_offer(event_id, waiter.user_id, later, window)
        .await
        .unwrap();
    assert_eq!(release.entry.status, WaitlistStatus::Waiting);
    assert_eq!(release.handoff.released, vec![Some(1)]);
    assert!(store.lapsed_offers(later, 10).await.unwrap().is_empty());

    let err = store
        .confirm_offer(event_id, waiter.user_id, later)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OfferExpired(_)));
}

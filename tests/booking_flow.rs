mod common;

use common::{drain, preferred, request, Harness};
use seat_booking::error::AppError;
use seat_booking::models::{BookingStatus, EventStatus, WaitlistStatus};
use seat_booking::realtime::ServerEvent;
use seat_booking::services::notifications::NotificationKind;
use seat_booking::store::AllocationOutcome;
use uuid::Uuid;

fn confirmed(outcome: &AllocationOutcome) -> (Uuid, Vec<i32>, i32) {
    match outcome {
        AllocationOutcome::Confirmed {
            booking,
            seats,
            available,
        } => (booking.id, seats.clone(), *available),
        other => panic!("expected confirmation, got {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_seat_is_offered_to_the_waitlist_and_confirmed() {
    let h = Harness::new();
    let event = h.event(2).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut room = h.room(event.id);
    let mut bob_inbox = h.inbox(bob);

    let a = h.state.bookings.create_booking(alice, preferred(event.id, &[1, 2])).await.unwrap();
    let (a_booking, seats, available) = confirmed(&a);
    assert_eq!(seats, vec![1, 2]);
    assert_eq!(available, 0);

    let b = h.state.bookings.create_booking(bob, request(event.id, 1)).await.unwrap();
    match b {
        AllocationOutcome::Waitlisted { position, already_queued, .. } => {
            assert_eq!(position, 1);
            assert!(!already_queued);
        }
        other => panic!("expected waitlist, got {:?}", other),
    }

    drain(&mut room);
    let cancel = h
        .state
        .cancellations
        .cancel_seats(alice, a_booking, &[1])
        .await
        .unwrap();
    assert_eq!(cancel.freed, vec![1]);
    assert_eq!(cancel.available, 1);
    assert_eq!(cancel.booking.status, BookingStatus::Confirmed);

    let entry = h.store.waitlist_entry(event.id, bob).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Notified);
    let deadline = entry.expires_at.unwrap();
    assert_eq!(deadline - entry.notified_at.unwrap(), chrono::Duration::seconds(5));

    let offer = drain(&mut bob_inbox);
    assert!(matches!(
        offer.as_slice(),
        [ServerEvent::SeatAvailableForYou { seat_no: Some(1), countdown_secs: 5, .. }]
    ));
    assert_eq!(h.notifier.of_kind(NotificationKind::SeatAvailable).len(), 1);
    // оффер персональный, в комнату уходит только новый счётчик
    assert!(!drain(&mut room)
        .iter()
        .any(|f| matches!(f, ServerEvent::Freed { .. })));

    h.advance_secs(3);
    let confirmation = h.state.waitlist.confirm(bob, event.id).await.unwrap();
    assert_eq!(confirmation.seat_no, 1);
    assert_eq!(confirmation.available, 0);
    assert_eq!(confirmation.booking.status, BookingStatus::Confirmed);

    let entry = h.store.waitlist_entry(event.id, bob).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Confirmed);
    let frames = drain(&mut room);
    assert!(frames.contains(&ServerEvent::Booked { event_id: event.id, seat_no: 1 }));
    assert!(frames.contains(&ServerEvent::WaitlistSeatConfirmed {
        event_id: event.id,
        user_id: bob,
        seat_no: 1
    }));
}

#[tokio::test]
async fn unanswered_offer_returns_the_seat_to_everyone() {
    let h = Harness::new();
    let event = h.event(2).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let a = h.state.bookings.create_booking(alice, preferred(event.id, &[1, 2])).await.unwrap();
    let (a_booking, _, _) = confirmed(&a);
    h.state.bookings.create_booking(bob, request(event.id, 1)).await.unwrap();
    h.state.cancellations.cancel_seats(alice, a_booking, &[1]).await.unwrap();

    let mut room = h.room(event.id);
    h.advance_secs(6);
    let release = h.state.waitlist.expire(bob, event.id).await.unwrap();
    assert_eq!(release.entry.status, WaitlistStatus::Waiting);
    assert_eq!(release.entry.position, 1);
    assert!(release.handoff.offers.is_empty());
    assert_eq!(release.handoff.released, vec![Some(1)]);
    assert_eq!(release.available, 1);

    assert_eq!(
        drain(&mut room),
        vec![ServerEvent::Freed { event_id: event.id, seat_no: Some(1) }]
    );

    let err = h.state.waitlist.confirm(bob, event.id).await.unwrap_err();
    assert!(matches!(err, AppError::OfferExpired(_)));
}

#[tokio::test]
async fn occupied_preferred_seat_rejects_the_whole_request() {
    let h = Harness::new();
    let event = h.event(3).await;
    h.state
        .bookings
        .create_booking(Uuid::new_v4(), preferred(event.id, &[2]))
        .await
        .unwrap();

    let err = h
        .state
        .bookings
        .create_booking(Uuid::new_v4(), preferred(event.id, &[2, 3]))
        .await
        .unwrap_err();
    match err {
        AppError::Conflict { seats, message } => {
            assert_eq!(seats, vec![2]);
            assert!(message.contains('2'));
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(h.store.booked_seats(event.id).await, vec![2]);
    assert_eq!(h.state.capacity.seat_map(event.id).await.unwrap().available, 2);
}

#[tokio::test]
async fn last_seat_goes_to_exactly_one_of_many_concurrent_buyers() {
    let h = Harness::new();
    let event = h.event(5).await;

    let mut tasks = Vec::new();
    for _ in 0..40 {
        let state = h.state.clone();
        let event_id = event.id;
        tasks.push(tokio::spawn(async move {
            state
                .bookings
                .create_booking(Uuid::new_v4(), request(event_id, 1))
                .await
        }));
    }

    let mut seats = Vec::new();
    let mut waitlisted = Vec::new();
    for task in tasks {
        match task.await.unwrap().unwrap() {
            AllocationOutcome::Confirmed { seats: s, .. } => seats.extend(s),
            AllocationOutcome::Waitlisted { position, .. } => waitlisted.push(position),
        }
    }
    seats.sort_unstable();
    assert_eq!(seats, vec![1, 2, 3, 4, 5]);
    waitlisted.sort_unstable();
    assert_eq!(waitlisted, (1..=35).collect::<Vec<_>>());

    let map = h.state.capacity.seat_map(event.id).await.unwrap();
    assert_eq!(map.available, 0);
    assert_eq!(map.taken, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn repeated_idempotency_key_is_a_conflict() {
    let h = Harness::new();
    let event = h.event(10).await;
    let user = Uuid::new_v4();
    let mut req = request(event.id, 2);
    req.idempotency_key = Some("checkout-42".into());

    h.state.bookings.create_booking(user, req.clone()).await.unwrap();
    let err = h.state.bookings.create_booking(user, req.clone()).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));

    // тот же ключ у другого пользователя означает другой запрос
    h.state.bookings.create_booking(Uuid::new_v4(), req).await.unwrap();
    assert_eq!(h.state.capacity.seat_map(event.id).await.unwrap().available, 6);
}

#[tokio::test]
async fn booking_overrides_a_hold_on_the_same_seat() {
    let h = Harness::new();
    let event = h.event(4).await;
    let coordinator = h.state.coordinator.clone();

    let reply = coordinator.hold("conn-1", event.id, 1, None, None).await;
    assert_eq!(reply, ServerEvent::ok(None, Some(10)));

    let outcome = h
        .state
        .bookings
        .create_booking(Uuid::new_v4(), preferred(event.id, &[1]))
        .await
        .unwrap();
    assert_eq!(confirmed(&outcome).1, vec![1]);

    assert_eq!(
        coordinator.snapshot(event.id).await,
        ServerEvent::Snapshot { event_id: event.id, held: vec![] }
    );
}

#[tokio::test]
async fn request_larger_than_capacity_is_waitlisted() {
    let h = Harness::new();
    let event = h.event(2).await;
    let user = Uuid::new_v4();

    let first = h.state.bookings.create_booking(user, request(event.id, 3)).await.unwrap();
    let second = h.state.bookings.create_booking(user, request(event.id, 3)).await.unwrap();
    match (first, second) {
        (
            AllocationOutcome::Waitlisted { booking: a, already_queued: false, .. },
            AllocationOutcome::Waitlisted { booking: b, already_queued: true, .. },
        ) => {
            assert_eq!(a.id, b.id);
            assert_eq!(a.status, BookingStatus::Waiting);
        }
        other => panic!("unexpected outcomes {:?}", other),
    }
    assert_eq!(h.state.capacity.seat_map(event.id).await.unwrap().available, 2);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_store() {
    let h = Harness::new();
    let event = h.event(3).await;
    let user = Uuid::new_v4();

    for bad in [
        request(event.id, 0),
        preferred(event.id, &[1, 1]),
        preferred(event.id, &[0]),
    ] {
        let err = h.state.bookings.create_booking(user, bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)), "{:?}", err);
    }

    let err = h
        .state
        .bookings
        .create_booking(user, request(Uuid::new_v4(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn finished_events_take_no_more_bookings() {
    let h = Harness::new();
    let event = h
        .store
        .insert_event_with_status(10, EventStatus::Completed)
        .await;

    let err = h
        .state
        .bookings
        .create_booking(Uuid::new_v4(), request(event.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));
    assert_eq!(h.state.capacity.seat_map(event.id).await.unwrap().available, 10);
}

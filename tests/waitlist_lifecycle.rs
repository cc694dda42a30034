mod common;

use common::{drain, preferred, request, Harness};
use seat_booking::error::AppError;
use seat_booking::models::{BookingStatus, WaitlistStatus};
use seat_booking::realtime::ServerEvent;
use seat_booking::services::OfferSweeper;
use seat_booking::store::AllocationOutcome;
use uuid::Uuid;

/// Событие на одно место: alice держит его, bob и carol в очереди.
async fn sold_out(h: &Harness) -> (Uuid, Uuid, Uuid, Uuid, Uuid) {
    let event = h.event(1).await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let booking = match h.state.bookings.create_booking(alice, request(event.id, 1)).await.unwrap() {
        AllocationOutcome::Confirmed { booking, .. } => booking.id,
        other => panic!("expected confirmation, got {:?}", other),
    };
    h.state.bookings.create_booking(bob, request(event.id, 1)).await.unwrap();
    h.state.bookings.create_booking(carol, request(event.id, 1)).await.unwrap();
    (event.id, booking, alice, bob, carol)
}

#[tokio::test]
async fn sweeper_passes_a_lapsed_offer_to_the_next_in_line() {
    let h = Harness::new();
    let (event_id, booking, alice, bob, carol) = sold_out(&h).await;
    let mut carol_inbox = h.inbox(carol);

    h.state.cancellations.cancel_booking(alice, booking).await.unwrap();
    assert_eq!(
        h.store.waitlist_entry(event_id, bob).await.unwrap().status,
        WaitlistStatus::Notified
    );

    let sweeper = OfferSweeper::new(h.state.ctx.clone());
    h.advance_secs(4);
    assert_eq!(sweeper.sweep_once().await.lapsed, 0);

    h.advance_secs(2);
    let stats = sweeper.sweep_once().await;
    assert_eq!(stats.lapsed, 1);
    assert_eq!(stats.reoffered, 1);
    assert_eq!(stats.freed, 0);
    assert_eq!(stats.failed, 0);

    let bob_entry = h.store.waitlist_entry(event_id, bob).await.unwrap();
    assert_eq!(bob_entry.status, WaitlistStatus::Waiting);
    assert_eq!(bob_entry.position, 1);
    assert_eq!(
        h.store.waitlist_entry(event_id, carol).await.unwrap().status,
        WaitlistStatus::Notified
    );
    assert!(matches!(
        drain(&mut carol_inbox).as_slice(),
        [ServerEvent::SeatAvailableForYou { seat_no: Some(1), .. }]
    ));

    // повторный обход ничего не находит
    assert_eq!(sweeper.sweep_once().await.lapsed, 0);
}

#[tokio::test]
async fn withdrawing_with_a_live_offer_hands_it_on() {
    let h = Harness::new();
    let (event_id, booking, alice, bob, carol) = sold_out(&h).await;
    h.state.cancellations.cancel_booking(alice, booking).await.unwrap();

    let release = h.state.waitlist.withdraw(bob, event_id).await.unwrap();
    assert_eq!(release.entry.status, WaitlistStatus::Cancelled);
    assert_eq!(release.handoff.offers.len(), 1);
    assert_eq!(release.handoff.offers[0].user_id, carol);

    // повторный выход ничего не меняет
    let again = h.state.waitlist.withdraw(bob, event_id).await.unwrap();
    assert_eq!(again.entry.status, WaitlistStatus::Cancelled);
    assert!(again.handoff.offers.is_empty());

    let confirmation = h.state.waitlist.confirm(carol, event_id).await.unwrap();
    assert_eq!(confirmation.seat_no, 1);
    assert_eq!(confirmation.available, 0);
}

#[tokio::test]
async fn direct_join_requires_a_sold_out_event() {
    let h = Harness::new();
    let event = h.event(1).await;
    let user = Uuid::new_v4();

    let err = h.state.waitlist.join(user, event.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));

    h.state.bookings.create_booking(Uuid::new_v4(), request(event.id, 1)).await.unwrap();
    let join = h.state.waitlist.join(user, event.id).await.unwrap();
    assert_eq!(join.entry.position, 1);
    assert!(!join.already_queued);
    assert!(h.state.waitlist.join(user, event.id).await.unwrap().already_queued);

    let late = Uuid::new_v4();
    h.state.waitlist.join(late, event.id).await.unwrap();
    let standing = h.state.waitlist.standing(late, event.id).await.unwrap();
    assert_eq!(standing.position, 2);
    assert_eq!(standing.ahead, 1);
    assert_eq!(standing.total_on_waitlist, 2);
    assert_eq!(standing.status, WaitlistStatus::Waiting);
}

#[tokio::test]
async fn grown_capacity_is_offered_to_the_waitlist_first() {
    let h = Harness::new();
    let (event_id, _, _, bob, carol) = sold_out(&h).await;
    let mut bob_inbox = h.inbox(bob);
    let mut room = h.room(event_id);

    let event = h.state.capacity.resize(event_id, 3).await.unwrap();
    assert_eq!(event.total_slots, 3);
    assert_eq!(event.available_slots, 2);

    assert!(matches!(
        drain(&mut bob_inbox).as_slice(),
        [ServerEvent::SeatAvailableForYou { seat_no: Some(2), .. }]
    ));
    assert_eq!(
        h.store.waitlist_entry(event_id, carol).await.unwrap().status,
        WaitlistStatus::Notified
    );
    assert_eq!(
        drain(&mut room),
        vec![ServerEvent::AvailabilityUpdated { event_id, available: 2 }]
    );

    let err = h.state.capacity.resize(event_id, 0).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));
    let err = h.state.capacity.resize(event_id, -1).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn partial_cancel_closes_the_booking_with_its_last_seat() {
    let h = Harness::new();
    let event = h.event(3).await;
    let user = Uuid::new_v4();
    let booking = match h.state.bookings.create_booking(user, request(event.id, 3)).await.unwrap() {
        AllocationOutcome::Confirmed { booking, .. } => booking.id,
        other => panic!("expected confirmation, got {:?}", other),
    };
    let mut room = h.room(event.id);

    let first = h.state.cancellations.cancel_seats(user, booking, &[1, 1]).await.unwrap();
    assert_eq!(first.freed, vec![1]);
    assert_eq!(first.booking.status, BookingStatus::Confirmed);
    assert_eq!(first.available, 1);
    let frames = drain(&mut room);
    assert!(frames.contains(&ServerEvent::Freed { event_id: event.id, seat_no: Some(1) }));

    let rest = h.state.cancellations.cancel_seats(user, booking, &[2, 3]).await.unwrap();
    assert_eq!(rest.freed, vec![2, 3]);
    assert_eq!(rest.booking.status, BookingStatus::Cancelled);
    assert_eq!(rest.available, 3);

    let again = h.state.cancellations.cancel_booking(user, booking).await.unwrap();
    assert!(again.already_cancelled);
    assert!(again.freed.is_empty());
    assert_eq!(again.available, 3);

    let err = h.state.cancellations.cancel_seats(user, booking, &[]).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn strangers_cannot_see_or_cancel_a_booking() {
    let h = Harness::new();
    let event = h.event(2).await;
    let owner = Uuid::new_v4();
    let booking = match h.state.bookings.create_booking(owner, request(event.id, 1)).await.unwrap() {
        AllocationOutcome::Confirmed { booking, .. } => booking.id,
        other => panic!("expected confirmation, got {:?}", other),
    };

    let stranger = Uuid::new_v4();
    assert!(matches!(
        h.state.cancellations.cancel_booking(stranger, booking).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.state.bookings.booking_seats(stranger, booking).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(h.state.capacity.seat_map(event.id).await.unwrap().available, 1);
}

#[tokio::test]
async fn seatless_legacy_booking_gets_seats_on_first_read() {
    let h = Harness::new();
    let event = h.event(4).await;
    h.state
        .bookings
        .create_booking(Uuid::new_v4(), preferred(event.id, &[1]))
        .await
        .unwrap();
    let user = Uuid::new_v4();
    let legacy = h.store.insert_legacy_booking(event.id, user, 2).await.unwrap();
    let mut room = h.room(event.id);

    let seats = h.state.bookings.booking_seats(user, legacy.id).await.unwrap();
    assert_eq!(seats.backfilled, vec![2, 3]);
    assert_eq!(
        seats.seats.iter().map(|s| s.seat_no).collect::<Vec<_>>(),
        vec![2, 3]
    );
    let frames = drain(&mut room);
    assert!(frames.contains(&ServerEvent::Booked { event_id: event.id, seat_no: 2 }));
    assert!(frames.contains(&ServerEvent::Booked { event_id: event.id, seat_no: 3 }));

    let again = h.state.bookings.booking_seats(user, legacy.id).await.unwrap();
    assert!(again.backfilled.is_empty());
    assert_eq!(again.seats.len(), 2);
    // счётчик уже учитывал эту бронь
    assert_eq!(h.state.capacity.seat_map(event.id).await.unwrap().available, 1);
}

#[tokio::test]
async fn cancelling_a_waiting_booking_leaves_the_queue() {
    let h = Harness::new();
    let (event_id, _, _, bob, carol) = sold_out(&h).await;
    let bob_booking = h
        .state
        .bookings
        .user_bookings(bob)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(bob_booking.booking.status, BookingStatus::Waiting);
    assert!(bob_booking.seat_numbers.is_empty());

    let outcome = h
        .state
        .cancellations
        .cancel_booking(bob, bob_booking.booking.id)
        .await
        .unwrap();
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
    assert!(outcome.freed.is_empty());
    assert_eq!(
        h.store.waitlist_entry(event_id, bob).await.unwrap().status,
        WaitlistStatus::Cancelled
    );

    let standing = h.state.waitlist.standing(carol, event_id).await.unwrap();
    assert_eq!(standing.ahead, 0);
    assert_eq!(standing.total_on_waitlist, 1);
}

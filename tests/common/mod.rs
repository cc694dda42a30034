#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use seat_booking::clock::ManualClock;
use seat_booking::config::Config;
use seat_booking::holds::MemoryHoldStore;
use seat_booking::models::Event;
use seat_booking::realtime::{Audience, RoomHub, ServerEvent};
use seat_booking::services::notifications::MemoryPublisher;
use seat_booking::services::CreateBooking;
use seat_booking::store::MemoryBookingStore;
use seat_booking::{AppState, Backends};

/// Приложение целиком на in-memory зависимостях и ручных часах.
pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryBookingStore>,
    pub holds: Arc<MemoryHoldStore>,
    pub notifier: Arc<MemoryPublisher>,
    pub clock: Arc<ManualClock>,
    pub hub: Arc<RoomHub>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryBookingStore::new(config.allocation.max_attempts));
        let holds = Arc::new(MemoryHoldStore::new());
        let notifier = Arc::new(MemoryPublisher::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let hub = Arc::new(RoomHub::default());
        let state = AppState::assemble(
            config,
            None,
            Backends {
                store: store.clone(),
                holds: holds.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
                hub: hub.clone(),
            },
        );
        Self {
            state,
            store,
            holds,
            notifier,
            clock,
            hub,
        }
    }

    pub async fn event(&self, total_slots: i32) -> Event {
        self.store.insert_event(total_slots).await
    }

    pub fn room(&self, event_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.hub.subscribe(Audience::Room(event_id))
    }

    pub fn inbox(&self, user_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.hub.subscribe(Audience::User(user_id))
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

pub fn request(event_id: Uuid, seats: i32) -> CreateBooking {
    CreateBooking {
        event_id,
        seats,
        preferred: None,
        idempotency_key: None,
    }
}

pub fn preferred(event_id: Uuid, seats: &[i32]) -> CreateBooking {
    CreateBooking {
        event_id,
        seats: seats.len() as i32,
        preferred: Some(seats.to_vec()),
        idempotency_key: None,
    }
}

/// Всё, что успело прийти в канал, без ожидания.
pub fn drain(rx: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

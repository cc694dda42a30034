pub mod allocation;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod holds;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::holds::{HoldStore, MemoryHoldStore, RedisHoldStore};
use crate::realtime::{fanout, RoomHub, SeatHoldCoordinator};
use crate::services::notifications::{
    HttpNotificationPublisher, LogNotificationPublisher, NotificationPublisher,
};
use crate::services::{
    BookingContext, BookingService, CancellationService, CapacityService, WaitlistService,
};
use crate::store::{BookingStore, MemoryBookingStore, PgBookingStore};

/// Хранилища и внешние зависимости, из которых собирается состояние.
pub struct Backends {
    pub store: Arc<dyn BookingStore>,
    pub holds: Arc<dyn HoldStore>,
    pub notifier: Arc<dyn NotificationPublisher>,
    pub clock: Arc<dyn Clock>,
    pub hub: Arc<RoomHub>,
}

impl Backends {
    /// Всё в памяти процесса: для разработки без инфраструктуры и для тестов.
    pub fn in_memory(config: &config::Config) -> Self {
        Self {
            store: Arc::new(MemoryBookingStore::new(config.allocation.max_attempts)),
            holds: Arc::new(MemoryHoldStore::new()),
            notifier: Arc::new(LogNotificationPublisher),
            clock: Arc::new(SystemClock),
            hub: Arc::new(RoomHub::default()),
        }
    }
}

// Shared state для всего приложения
pub struct AppState {
    pub config: config::Config,
    pub db: Option<database::Database>,
    pub ctx: Arc<BookingContext>,
    pub hub: Arc<RoomHub>,
    pub coordinator: Arc<SeatHoldCoordinator>,
    pub bookings: BookingService,
    pub cancellations: CancellationService,
    pub waitlist: WaitlistService,
    pub capacity: CapacityService,
}

impl AppState {
    /// Подключается к Postgres и Redis, если они настроены; иначе память.
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let mut backends = Backends::in_memory(&config);

        let db = match &config.database.url {
            Some(url) => {
                let db = database::Database::new(url, config.database.pool_size).await?;
                db.run_migrations().await?;
                backends.store = Arc::new(PgBookingStore::new(
                    db.pool.clone(),
                    config.allocation.max_attempts,
                ));
                Some(db)
            }
            None => {
                info!("DATABASE_URL not set, bookings are kept in memory");
                None
            }
        };

        match &config.redis.url {
            Some(url) => {
                let redis = redis_client::RedisClient::new(url).await?;
                backends.holds = Arc::new(RedisHoldStore::new(redis.clone()));
                let _ = fanout::spawn(backends.hub.clone(), redis, config.redis.fanout_channel.clone());
            }
            None => info!("REDIS_URL not set, holds are local to this process"),
        }

        if let Some(url) = &config.notifications.url {
            backends.notifier = Arc::new(HttpNotificationPublisher::new(url.clone(), &config.notifications)?);
            info!(%url, "notifications are delivered over HTTP");
        }

        Ok(Self::assemble(config, db, backends))
    }

    pub fn assemble(
        config: config::Config,
        db: Option<database::Database>,
        backends: Backends,
    ) -> Arc<Self> {
        let ctx = Arc::new(BookingContext {
            store: backends.store,
            holds: backends.holds.clone(),
            hub: backends.hub.clone(),
            notifier: backends.notifier,
            clock: backends.clock,
            holds_config: config.holds.clone(),
            waitlist_config: config.waitlist.clone(),
        });
        let coordinator = Arc::new(SeatHoldCoordinator::new(
            backends.holds,
            backends.hub.clone(),
            config.holds.clone(),
        ));

        Arc::new(Self {
            bookings: BookingService::new(ctx.clone()),
            cancellations: CancellationService::new(ctx.clone()),
            waitlist: WaitlistService::new(ctx.clone()),
            capacity: CapacityService::new(ctx.clone()),
            hub: backends.hub,
            coordinator,
            ctx,
            db,
            config,
        })
    }
}

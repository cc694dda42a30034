use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::{Audience, RoomHub};
use super::messages::ServerEvent;
use crate::config::HoldConfig;
use crate::holds::{HoldOutcome, HoldStore, ReleaseOutcome};

pub const ALREADY_HELD: &str = "already_held";
pub const NOT_OWNER: &str = "not_owner";
pub const UNAVAILABLE: &str = "unavailable";

/// Протокол холдов поверх `HoldStore` и `RoomHub`.
///
/// В БД не ходит: только эфемерная эксклюзивность и рассылка. Потерянное
/// сообщение исправит следующий snapshot или событие брони.
pub struct SeatHoldCoordinator {
    holds: Arc<dyn HoldStore>,
    hub: Arc<RoomHub>,
    config: HoldConfig,
}

impl SeatHoldCoordinator {
    pub fn new(holds: Arc<dyn HoldStore>, hub: Arc<RoomHub>, config: HoldConfig) -> Self {
        Self { holds, hub, config }
    }

    pub fn config(&self) -> &HoldConfig {
        &self.config
    }

    pub fn hello(&self, connection_id: &str) -> ServerEvent {
        ServerEvent::Hello {
            connection_id: connection_id.to_string(),
            reconcile_interval_ms: self.config.reconcile_interval_ms,
            hold_ttl_secs: self.config.clamp_ttl(None).as_secs(),
        }
    }

    /// Подписка на комнату и сразу текущий snapshot.
    pub async fn join(&self, event_id: Uuid) -> (broadcast::Receiver<ServerEvent>, ServerEvent) {
        let rx = self.hub.subscribe(Audience::Room(event_id));
        (rx, self.snapshot(event_id).await)
    }

    /// Снимок удерживаемых мест. При недоступном хранилище отдаём пустой.
    pub async fn snapshot(&self, event_id: Uuid) -> ServerEvent {
        let held = match self.holds.snapshot(event_id).await {
            Ok(held) => held,
            Err(e) => {
                warn!(%event_id, error = %e, "hold snapshot degraded to empty");
                Vec::new()
            }
        };
        ServerEvent::Snapshot { event_id, held }
    }

    pub async fn hold(
        &self,
        connection_id: &str,
        event_id: Uuid,
        seat_no: i32,
        ttl_secs: Option<u64>,
        request_id: Option<String>,
    ) -> ServerEvent {
        if seat_no <= 0 {
            return ServerEvent::failed(request_id, "invalid_seat");
        }
        let ttl = self.config.clamp_ttl(ttl_secs);

        match self.holds.try_acquire(event_id, seat_no, connection_id, ttl).await {
            Ok(HoldOutcome::Granted) => {
                if let Err(e) = self.holds.index_hold(connection_id, event_id, seat_no).await {
                    // холд всё равно истечёт по TTL
                    warn!(connection_id, %event_id, seat_no, error = %e, "failed to index hold");
                }
                debug!(connection_id, %event_id, seat_no, ttl_secs = ttl.as_secs(), "seat held");
                self.hub.broadcast(event_id, ServerEvent::Held { event_id, seat_no });
                ServerEvent::ok(request_id, Some(ttl.as_secs()))
            }
            Ok(HoldOutcome::AlreadyHeld) => ServerEvent::failed(request_id, ALREADY_HELD),
            Err(e) => {
                warn!(connection_id, %event_id, seat_no, error = %e, "hold refused, store unavailable");
                ServerEvent::failed(request_id, UNAVAILABLE)
            }
        }
    }

    pub async fn release(
        &self,
        connection_id: &str,
        event_id: Uuid,
        seat_no: i32,
        request_id: Option<String>,
    ) -> ServerEvent {
        match self.holds.release(event_id, seat_no, connection_id).await {
            Ok(ReleaseOutcome::Released) => {
                self.hub.broadcast(event_id, ServerEvent::Released { event_id, seat_no });
                ServerEvent::ok(request_id, None)
            }
            Ok(ReleaseOutcome::NotOwner) => ServerEvent::failed(request_id, NOT_OWNER),
            Err(e) => {
                warn!(connection_id, %event_id, seat_no, error = %e, "release failed, store unavailable");
                ServerEvent::failed(request_id, UNAVAILABLE)
            }
        }
    }

    /// Соединение закрыто: снять все его холды и разослать `released`.
    pub async fn on_disconnect(&self, connection_id: &str) -> usize {
        let dropped = match self.holds.drop_all_holds(connection_id).await {
            Ok(dropped) => dropped,
            Err(e) => {
                warn!(connection_id, error = %e, "disconnect cleanup skipped, holds will expire by TTL");
                return 0;
            }
        };
        for (event_id, seat_no) in &dropped {
            self.hub.broadcast(
                *event_id,
                ServerEvent::Released {
                    event_id: *event_id,
                    seat_no: *seat_no,
                },
            );
        }
        if !dropped.is_empty() {
            info!(connection_id, released = dropped.len(), "released holds of closed connection");
        }
        dropped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holds::{HoldStoreError, MemoryHoldStore};
    use async_trait::async_trait;
    use std::time::Duration;

    fn coordinator() -> (SeatHoldCoordinator, Arc<RoomHub>) {
        let hub = Arc::new(RoomHub::default());
        let holds: Arc<dyn HoldStore> = Arc::new(MemoryHoldStore::new());
        (
            SeatHoldCoordinator::new(holds, hub.clone(), HoldConfig::default()),
            hub,
        )
    }

    #[tokio::test]
    async fn contested_hold_is_refused_without_broadcast() {
        let (coordinator, _hub) = coordinator();
        let event = Uuid::new_v4();
        let (mut room, snapshot) = coordinator.join(event).await;
        assert_eq!(snapshot, ServerEvent::Snapshot { event_id: event, held: vec![] });

        let reply = coordinator.hold("a", event, 3, Some(60), Some("1".into())).await;
        // TTL режется до потолка в 10 секунд
        assert_eq!(reply, ServerEvent::ok(Some("1".into()), Some(10)));
        assert_eq!(room.recv().await.unwrap(), ServerEvent::Held { event_id: event, seat_no: 3 });

        let reply = coordinator.hold("b", event, 3, None, None).await;
        assert_eq!(reply, ServerEvent::failed(None, ALREADY_HELD));
        assert!(room.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_releases_every_hold_of_the_connection() {
        let (coordinator, _hub) = coordinator();
        let event = Uuid::new_v4();
        let (mut room, _) = coordinator.join(event).await;
        coordinator.hold("a", event, 1, None, None).await;
        coordinator.hold("a", event, 2, None, None).await;
        coordinator.hold("b", event, 5, None, None).await;
        for _ in 0..3 {
            room.recv().await.unwrap();
        }

        assert_eq!(coordinator.on_disconnect("a").await, 2);
        let mut released = vec![];
        for _ in 0..2 {
            match room.recv().await.unwrap() {
                ServerEvent::Released { seat_no, .. } => released.push(seat_no),
                other => panic!("unexpected frame {:?}", other),
            }
        }
        released.sort();
        assert_eq!(released, vec![1, 2]);
        assert_eq!(
            coordinator.snapshot(event).await,
            ServerEvent::Snapshot { event_id: event, held: vec![5] }
        );
    }

    #[tokio::test]
    async fn release_by_stranger_is_refused() {
        let (coordinator, _hub) = coordinator();
        let event = Uuid::new_v4();
        coordinator.hold("a", event, 1, None, None).await;
        assert_eq!(
            coordinator.release("b", event, 1, None).await,
            ServerEvent::failed(None, NOT_OWNER)
        );
        assert_eq!(coordinator.release("a", event, 1, None).await, ServerEvent::ok(None, None));
    }

    struct DownStore;

    #[async_trait]
    impl HoldStore for DownStore {
        async fn try_acquire(&self, _: Uuid, _: i32, _: &str, _: Duration) -> Result<HoldOutcome, HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
        async fn release(&self, _: Uuid, _: i32, _: &str) -> Result<ReleaseOutcome, HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
        async fn snapshot(&self, _: Uuid) -> Result<Vec<i32>, HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
        async fn index_hold(&self, _: &str, _: Uuid, _: i32) -> Result<(), HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
        async fn drop_all_holds(&self, _: &str) -> Result<Vec<(Uuid, i32)>, HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
        async fn clear_hold(&self, _: Uuid, _: i32) -> Result<(), HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
        async fn claim_token(&self, _: &str, _: Duration) -> Result<bool, HoldStoreError> {
            Err(HoldStoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn store_outage_fails_closed_on_hold_and_open_on_snapshot() {
        let hub = Arc::new(RoomHub::default());
        let coordinator = SeatHoldCoordinator::new(Arc::new(DownStore), hub, HoldConfig::default());
        let event = Uuid::new_v4();

        assert_eq!(
            coordinator.hold("a", event, 1, None, None).await,
            ServerEvent::failed(None, UNAVAILABLE)
        );
        assert_eq!(
            coordinator.snapshot(event).await,
            ServerEvent::Snapshot { event_id: event, held: vec![] }
        );
        assert_eq!(coordinator.on_disconnect("a").await, 0);
    }
}

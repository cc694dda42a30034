use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::fanout::FanoutEnvelope;
use super::messages::ServerEvent;

/// Кому адресовано сообщение: комната события или все сокеты пользователя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Audience {
    Room(Uuid),
    User(Uuid),
}

/// Локальная раздача сообщений по сокетам процесса.
///
/// На каждую аудиторию один `broadcast`-канал. Доставка без гарантий:
/// отстающий подписчик теряет сообщения и догоняет через snapshot.
/// Если подключён fan-out, всё опубликованное уходит и в Redis, чтобы
/// дошло до сокетов других процессов.
pub struct RoomHub {
    node_id: Uuid,
    capacity: usize,
    channels: RwLock<HashMap<Audience, broadcast::Sender<ServerEvent>>>,
    fanout: OnceLock<mpsc::UnboundedSender<FanoutEnvelope>>,
}

impl RoomHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
            fanout: OnceLock::new(),
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn attach_fanout(&self, tx: mpsc::UnboundedSender<FanoutEnvelope>) {
        if self.fanout.set(tx).is_err() {
            tracing::warn!("fanout already attached, ignoring second sender");
        }
    }

    pub fn subscribe(&self, audience: Audience) -> broadcast::Receiver<ServerEvent> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(audience)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn broadcast(&self, event_id: Uuid, event: ServerEvent) {
        self.publish(Audience::Room(event_id), event);
    }

    pub fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        self.publish(Audience::User(user_id), event);
    }

    fn publish(&self, audience: Audience, event: ServerEvent) {
        if let Some(tx) = self.fanout.get() {
            let envelope = FanoutEnvelope {
                origin: self.node_id,
                audience,
                event: event.clone(),
            };
            if tx.send(envelope).is_err() {
                tracing::warn!(?audience, "fanout publisher is gone, delivering locally only");
            }
        }
        self.deliver_local(audience, event);
    }

    /// Возвращает число локальных получателей.
    pub fn deliver_local(&self, audience: Audience, event: ServerEvent) -> usize {
        let sent = {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            match channels.get(&audience) {
                Some(tx) => tx.send(event).ok(),
                None => return 0,
            }
        };
        match sent {
            Some(n) => n,
            None => {
                // подписчиков не осталось
                let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
                if channels
                    .get(&audience)
                    .is_some_and(|tx| tx.receiver_count() == 0)
                {
                    channels.remove(&audience);
                }
                0
            }
        }
    }

    pub fn audience_count(&self) -> usize {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Межпроцессная раздача через Redis pub/sub.
//!
//! Каждый процесс публикует свои сообщения в общий канал с пометкой
//! node id и доставляет локально только чужие. Потеря сообщения здесь
//! допустима: клиенты периодически запрашивают snapshot.

use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::{Audience, RoomHub};
use super::messages::ServerEvent;
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    pub origin: Uuid,
    pub audience: Audience,
    pub event: ServerEvent,
}

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Подключает хаб к Redis: один таск публикует, другой слушает канал.
pub fn spawn(hub: Arc<RoomHub>, redis: RedisClient, channel: String) -> (JoinHandle<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    hub.attach_fanout(tx);
    info!(%channel, node_id = %hub.node_id(), "redis fanout enabled");

    let publisher = tokio::spawn(run_publisher(rx, redis.clone(), channel.clone()));
    let listener = tokio::spawn(run_listener(hub, redis, channel));
    (publisher, listener)
}

async fn run_publisher(
    mut rx: mpsc::UnboundedReceiver<FanoutEnvelope>,
    redis: RedisClient,
    channel: String,
) {
    let mut conn = redis.conn.clone();
    while let Some(envelope) = rx.recv().await {
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode fanout message");
                continue;
            }
        };
        if let Err(e) = conn.publish::<_, _, ()>(&channel, payload).await {
            warn!(error = %e, "fanout publish failed");
        }
    }
}

async fn run_listener(hub: Arc<RoomHub>, redis: RedisClient, channel: String) {
    loop {
        match listen(&hub, &redis, &channel).await {
            Ok(()) => warn!(%channel, "fanout subscription closed, resubscribing"),
            Err(e) => warn!(%channel, error = %e, "fanout subscription failed, retrying"),
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

async fn listen(hub: &RoomHub, redis: &RedisClient, channel: &str) -> redis::RedisResult<()> {
    let mut pubsub = redis.pubsub().await?;
    pubsub.subscribe(channel).await?;
    let mut messages = pubsub.on_message();

    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unreadable fanout payload");
                continue;
            }
        };
        match serde_json::from_str::<FanoutEnvelope>(&payload) {
            Ok(envelope) if envelope.origin != hub.node_id() => {
                let delivered = hub.deliver_local(envelope.audience, envelope.event);
                debug!(audience = ?envelope.audience, delivered, "fanout message delivered");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "malformed fanout message"),
        }
    }
    Ok(())
}

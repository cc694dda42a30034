use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    event_holds_key, holder_index_key, index_member, parse_index_member, seat_hold_key,
    HoldOutcome, HoldStore, HoldStoreError, ReleaseOutcome,
};
use crate::redis_client::RedisClient;

// DEL только если значение ключа совпадает с владельцем
const RELEASE_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

// Индекс соединения переживает любой холд; если процесс упал без
// disconnect, индекс истечёт сам
const HOLDER_INDEX_TTL_SECS: i64 = 300;

#[derive(Clone)]
pub struct RedisHoldStore {
    redis: RedisClient,
    release_script: Script,
}

impl RedisHoldStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            release_script: Script::new(RELEASE_IF_OWNER),
        }
    }

    async fn delete_if_owner(&self, key: &str, holder: &str) -> Result<bool, HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl HoldStore for RedisHoldStore {
    async fn try_acquire(
        &self,
        event_id: Uuid,
        seat_no: i32,
        holder: &str,
        ttl: Duration,
    ) -> Result<HoldOutcome, HoldStoreError> {
        let key = seat_hold_key(event_id, seat_no);
        let mut conn = self.redis.conn.clone();

        // SET NX EX - атомарная операция без гонок
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        if result.is_none() {
            return Ok(HoldOutcome::AlreadyHeld);
        }

        let _: () = conn.sadd(event_holds_key(event_id), seat_no).await?;
        Ok(HoldOutcome::Granted)
    }

    async fn release(
        &self,
        event_id: Uuid,
        seat_no: i32,
        holder: &str,
    ) -> Result<ReleaseOutcome, HoldStoreError> {
        let key = seat_hold_key(event_id, seat_no);
        if !self.delete_if_owner(&key, holder).await? {
            return Ok(ReleaseOutcome::NotOwner);
        }

        let mut conn = self.redis.conn.clone();
        let mut pipe = redis::pipe();
        pipe.srem(event_holds_key(event_id), seat_no)
            .srem(holder_index_key(holder), index_member(event_id, seat_no));
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(ReleaseOutcome::Released)
    }

    async fn snapshot(&self, event_id: Uuid) -> Result<Vec<i32>, HoldStoreError> {
        let set_key = event_holds_key(event_id);
        let mut conn = self.redis.conn.clone();
        let members: Vec<i32> = conn.smembers(&set_key).await?;
        if members.is_empty() {
            return Ok(members);
        }

        // 1. Проверяем все ключи холдов одним пайплайном
        let mut pipe = redis::pipe();
        for seat_no in &members {
            pipe.exists(seat_hold_key(event_id, *seat_no));
        }
        let alive: Vec<bool> = pipe.query_async(&mut conn).await?;

        // 2. Делим на живые и протухшие
        let (held, stale): (Vec<(i32, bool)>, Vec<(i32, bool)>) = members
            .into_iter()
            .zip(alive)
            .partition(|(_, is_alive)| *is_alive);

        // 3. Ленивая чистка множества
        if !stale.is_empty() {
            let stale: Vec<i32> = stale.into_iter().map(|(seat, _)| seat).collect();
            debug!(%event_id, pruned = stale.len(), "pruning expired holds from snapshot");
            let _: () = conn.srem(&set_key, stale).await?;
        }

        let mut held: Vec<i32> = held.into_iter().map(|(seat, _)| seat).collect();
        held.sort_unstable();
        Ok(held)
    }

    async fn index_hold(
        &self,
        holder: &str,
        event_id: Uuid,
        seat_no: i32,
    ) -> Result<(), HoldStoreError> {
        let key = holder_index_key(holder);
        let mut conn = self.redis.conn.clone();
        let mut pipe = redis::pipe();
        pipe.sadd(&key, index_member(event_id, seat_no))
            .expire(&key, HOLDER_INDEX_TTL_SECS);
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn drop_all_holds(&self, holder: &str) -> Result<Vec<(Uuid, i32)>, HoldStoreError> {
        let key = holder_index_key(holder);
        let mut conn = self.redis.conn.clone();
        let members: Vec<String> = conn.smembers(&key).await?;

        let mut released = Vec::new();
        for member in members {
            let (event_id, seat_no) = match parse_index_member(&member) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("skipping hold index entry: {}", e);
                    continue;
                }
            };
            // Холд мог истечь и достаться другому соединению - его не трогаем
            if self.delete_if_owner(&seat_hold_key(event_id, seat_no), holder).await? {
                let _: () = conn.srem(event_holds_key(event_id), seat_no).await?;
                released.push((event_id, seat_no));
            }
        }

        let _: () = conn.del(&key).await?;
        Ok(released)
    }

    async fn clear_hold(&self, event_id: Uuid, seat_no: i32) -> Result<(), HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        let mut pipe = redis::pipe();
        pipe.del(seat_hold_key(event_id, seat_no))
            .srem(event_holds_key(event_id), seat_no);
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn claim_token(&self, token: &str, ttl: Duration) -> Result<bool, HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(token)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }
}

//! Эфемерное хранилище холдов.
//!
//! Холд: короткая эксклюзивная заявка соединения на место с жёстким TTL
//! (не больше 10 секунд, без продления). Холд носит рекомендательный
//! характер: окончательное решение о брони принимается только по
//! счётчику в БД, а успешная бронь просто стирает холд.
//!
//! Из примитивов только атомарные операции над одним ключом,
//! set-if-absent с TTL и compare-and-delete по владельцу.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

pub use self::memory::MemoryHoldStore;
pub use self::redis_store::RedisHoldStore;

#[derive(Debug, thiserror::Error)]
pub enum HoldStoreError {
    #[error("hold store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt hold entry: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for HoldStoreError {
    fn from(e: redis::RedisError) -> Self {
        HoldStoreError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    Granted,
    AlreadyHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotOwner,
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    /// SET NX + EX одной операцией.
    async fn try_acquire(
        &self,
        event_id: Uuid,
        seat_no: i32,
        holder: &str,
        ttl: Duration,
    ) -> Result<HoldOutcome, HoldStoreError>;

    /// Снять холд может только его текущий владелец.
    async fn release(
        &self,
        event_id: Uuid,
        seat_no: i32,
        holder: &str,
    ) -> Result<ReleaseOutcome, HoldStoreError>;

    /// Удерживаемые места события; участники с истёкшим ключом вычищаются.
    async fn snapshot(&self, event_id: Uuid) -> Result<Vec<i32>, HoldStoreError>;

    async fn index_hold(
        &self,
        holder: &str,
        event_id: Uuid,
        seat_no: i32,
    ) -> Result<(), HoldStoreError>;

    /// Снимает все холды соединения, возвращает реально освобождённые.
    async fn drop_all_holds(&self, holder: &str) -> Result<Vec<(Uuid, i32)>, HoldStoreError>;

    /// Безусловное удаление: бронь всегда сильнее холда.
    async fn clear_hold(&self, event_id: Uuid, seat_no: i32) -> Result<(), HoldStoreError>;

    /// Одноразовый токен (idempotency key) с TTL. false, если токен уже занят.
    async fn claim_token(&self, token: &str, ttl: Duration) -> Result<bool, HoldStoreError>;
}

pub(crate) fn seat_hold_key(event_id: Uuid, seat_no: i32) -> String {
    format!("seat:hold:{}:{}", event_id, seat_no)
}

pub(crate) fn event_holds_key(event_id: Uuid) -> String {
    format!("event:{}:holds", event_id)
}

pub(crate) fn holder_index_key(holder: &str) -> String {
    format!("sock:{}:holds", holder)
}

pub(crate) fn index_member(event_id: Uuid, seat_no: i32) -> String {
    format!("{}:{}", event_id, seat_no)
}

pub(crate) fn parse_index_member(member: &str) -> Result<(Uuid, i32), HoldStoreError> {
    let (event, seat) = member
        .rsplit_once(':')
        .ok_or_else(|| HoldStoreError::Corrupt(member.to_string()))?;
    let event_id = Uuid::parse_str(event).map_err(|_| HoldStoreError::Corrupt(member.to_string()))?;
    let seat_no = seat
        .parse()
        .map_err(|_| HoldStoreError::Corrupt(member.to_string()))?;
    Ok((event_id, seat_no))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_member_round_trips_through_parser() {
        let event = Uuid::new_v4();
        let member = index_member(event, 17);
        assert_eq!(parse_index_member(&member).unwrap(), (event, 17));
        assert!(parse_index_member("garbage").is_err());
    }
}

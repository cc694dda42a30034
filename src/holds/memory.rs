use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{HoldOutcome, HoldStore, HoldStoreError, ReleaseOutcome};

#[derive(Debug)]
struct Hold {
    holder: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    holds: HashMap<(Uuid, i32), Hold>,
    event_sets: HashMap<Uuid, BTreeSet<i32>>,
    holder_index: HashMap<String, HashSet<(Uuid, i32)>>,
    tokens: HashMap<String, Instant>,
}

impl Inner {
    fn live_hold(&self, event_id: Uuid, seat_no: i32, now: Instant) -> Option<&Hold> {
        self.holds
            .get(&(event_id, seat_no))
            .filter(|hold| hold.expires_at > now)
    }
}

/// Хранилище холдов в памяти процесса.
///
/// Та же семантика, что у Redis: ключ с TTL, множество мест события,
/// индекс по соединению. Время берётся из `tokio::time`, поэтому в тестах
/// с остановленными часами TTL можно проматывать.
#[derive(Debug, Default)]
pub struct MemoryHoldStore {
    inner: Mutex<Inner>,
}

impl MemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HoldStore for MemoryHoldStore {
    async fn try_acquire(
        &self,
        event_id: Uuid,
        seat_no: i32,
        holder: &str,
        ttl: Duration,
    ) -> Result<HoldOutcome, HoldStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.live_hold(event_id, seat_no, now).is_some() {
            return Ok(HoldOutcome::AlreadyHeld);
        }
        inner.holds.insert(
            (event_id, seat_no),
            Hold {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        inner.event_sets.entry(event_id).or_default().insert(seat_no);
        Ok(HoldOutcome::Granted)
    }

    async fn release(
        &self,
        event_id: Uuid,
        seat_no: i32,
        holder: &str,
    ) -> Result<ReleaseOutcome, HoldStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let owned = inner
            .live_hold(event_id, seat_no, now)
            .is_some_and(|hold| hold.holder == holder);
        if !owned {
            return Ok(ReleaseOutcome::NotOwner);
        }
        inner.holds.remove(&(event_id, seat_no));
        if let Some(set) = inner.event_sets.get_mut(&event_id) {
            set.remove(&seat_no);
        }
        if let Some(index) = inner.holder_index.get_mut(holder) {
            index.remove(&(event_id, seat_no));
        }
        Ok(ReleaseOutcome::Released)
    }

    async fn snapshot(&self, event_id: Uuid) -> Result<Vec<i32>, HoldStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let members: Vec<i32> = inner
            .event_sets
            .get(&event_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let (held, stale): (Vec<i32>, Vec<i32>) = members
            .into_iter()
            .partition(|seat| inner.live_hold(event_id, *seat, now).is_some());

        for seat in stale {
            inner.holds.remove(&(event_id, seat));
            if let Some(set) = inner.event_sets.get_mut(&event_id) {
                set.remove(&seat);
            }
        }
        Ok(held)
    }

    async fn index_hold(
        &self,
        holder: &str,
        event_id: Uuid,
        seat_no: i32,
    ) -> Result<(), HoldStoreError> {
        self.lock()
            .holder_index
            .entry(holder.to_string())
            .or_default()
            .insert((event_id, seat_no));
        Ok(())
    }

    async fn drop_all_holds(&self, holder: &str) -> Result<Vec<(Uuid, i32)>, HoldStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let Some(index) = inner.holder_index.remove(holder) else {
            return Ok(Vec::new());
        };

        let mut released: Vec<(Uuid, i32)> = index
            .into_iter()
            .filter(|(event_id, seat_no)| {
                inner
                    .live_hold(*event_id, *seat_no, now)
                    .is_some_and(|hold| hold.holder == holder)
            })
            .collect();
        released.sort();

        for (event_id, seat_no) in &released {
            inner.holds.remove(&(*event_id, *seat_no));
            if let Some(set) = inner.event_sets.get_mut(event_id) {
                set.remove(seat_no);
            }
        }
        Ok(released)
    }

    async fn clear_hold(&self, event_id: Uuid, seat_no: i32) -> Result<(), HoldStoreError> {
        let mut inner = self.lock();
        inner.holds.remove(&(event_id, seat_no));
        if let Some(set) = inner.event_sets.get_mut(&event_id) {
            set.remove(&seat_no);
        }
        Ok(())
    }

    async fn claim_token(&self, token: &str, ttl: Duration) -> Result<bool, HoldStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.tokens.get(token).is_some_and(|expires| *expires > now) {
            return Ok(false);
        }
        inner.tokens.insert(token.to_string(), now + ttl);
        Ok(true)
    }
}

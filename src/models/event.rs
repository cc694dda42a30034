use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_status;

/// Событие глазами движка бронирования: только поля вместимости.
///
/// Инвариант: `0 <= available_slots <= total_slots`, счётчик меняется
/// только внутри транзакции, держащей блокировку строки события.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub total_slots: i32,
    pub available_slots: i32,
    pub status: EventStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

text_status!(EventStatus {
    Upcoming => "upcoming",
    Ongoing => "ongoing",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl EventStatus {
    pub fn accepts_bookings(&self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Ongoing)
    }
}

// Карта зала: всего мест, свободно по счётчику, занятые номера
#[derive(Debug, Clone, Serialize)]
pub struct SeatMap {
    pub event_id: Uuid,
    pub total: i32,
    pub available: i32,
    pub taken: Vec<i32>,
}

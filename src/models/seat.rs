use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_status;

// Одна строка на назначенное место. Для события не больше одной
// строки status=booked на номер (частичный уникальный индекс в БД)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSeat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub user_id: Uuid,
    pub seat_no: i32,
    pub status: SeatStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Booked,
    Cancelled,
}

text_status!(SeatStatus {
    Booked => "booked",
    Cancelled => "cancelled",
});

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_status;
use crate::error::{AppError, AppResult};

/// Место пользователя в очереди на событие. Уникально по (event_id, user_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub status: WaitlistStatus,
    pub notified_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// waiting → notified → {confirmed | expired}; expired → waiting;
/// любое состояние → cancelled. Терминальные: confirmed, cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Confirmed,
    Expired,
    Cancelled,
}

text_status!(WaitlistStatus {
    Waiting => "waiting",
    Notified => "notified",
    Confirmed => "confirmed",
    Expired => "expired",
    Cancelled => "cancelled",
});

impl WaitlistStatus {
    /// Запись стоит в очереди или держит оффер.
    pub fn is_active(&self) -> bool {
        matches!(self, WaitlistStatus::Waiting | WaitlistStatus::Notified)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WaitlistStatus::Confirmed | WaitlistStatus::Cancelled)
    }
}

impl WaitlistEntry {
    pub fn new(event_id: Uuid, user_id: Uuid, position: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            position,
            status: WaitlistStatus::Waiting,
            notified_at: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Статус с учётом часов: просроченный, но ещё не обработанный оффер
    /// показывается как `expired`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> WaitlistStatus {
        match (self.status, self.expires_at) {
            (WaitlistStatus::Notified, Some(deadline)) if deadline <= now => WaitlistStatus::Expired,
            (status, _) => status,
        }
    }

    pub fn offer_is_live(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == WaitlistStatus::Notified
    }

    pub fn notify(&mut self, now: DateTime<Utc>, window: Duration) -> AppResult<DateTime<Utc>> {
        if self.status != WaitlistStatus::Waiting {
            return Err(AppError::conflict(format!(
                "waitlist entry is {}, only waiting entries can be notified",
                self.status
            )));
        }
        let expires_at = now + window;
        self.status = WaitlistStatus::Notified;
        self.notified_at = Some(now);
        self.expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(expires_at)
    }

    /// Оффер истёк: запись проходит через expired и возвращается в очередь
    /// со своей исходной позицией.
    pub fn lapse(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.effective_status(now) != WaitlistStatus::Expired {
            return Err(AppError::conflict("no expired offer for this waitlist entry"));
        }
        self.status = WaitlistStatus::Expired;
        self.requeue(now);
        Ok(())
    }

    fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = WaitlistStatus::Waiting;
        self.notified_at = None;
        self.expires_at = None;
        self.updated_at = now;
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.offer_is_live(now) {
            return Err(AppError::OfferExpired(
                "no live offer: the confirmation window has closed".into(),
            ));
        }
        self.status = WaitlistStatus::Confirmed;
        self.updated_at = now;
        Ok(())
    }

    /// Возвращает true, если снятая запись держала живой оффер.
    pub fn withdraw(&mut self, now: DateTime<Utc>) -> bool {
        let held_offer = self.offer_is_live(now);
        self.status = WaitlistStatus::Cancelled;
        self.notified_at = None;
        self.expires_at = None;
        self.updated_at = now;
        held_offer
    }

    /// Повторная постановка в очередь после терминального состояния.
    pub fn rejoin(&mut self, position: i32, now: DateTime<Utc>) {
        self.position = position;
        self.requeue(now);
    }
}

//! Исходящие уведомления.
//!
//! Доставка вне нашей зоны ответственности: сервис только публикует
//! `{type, eventId, userId, seats?, message?}` по принципу fire-and-forget.
//! HTTP-публикатор защищён автоматическим выключателем (Circuit Breaker),
//! чтобы лежащий сервис уведомлений не копил зависшие запросы.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    BookingWaitlisted,
    BookingCancelled,
    SeatAvailable,
    WaitlistConfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub event_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seats: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, event_id: Uuid, user_id: Uuid) -> Self {
        Self {
            kind,
            event_id,
            user_id,
            seats: Vec::new(),
            message: None,
        }
    }

    pub fn with_seats(mut self, seats: Vec<i32>) -> Self {
        self.seats = seats;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Публикация не блокирует вызывающего и не возвращает ошибок.
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Состояния автоматического выключателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Запросы разрешены.
    Closed,
    /// Запросы запрещены до истечения таймаута.
    Open,
    /// Пропускаем пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    /// Счётчик последовательных сбоев.
    failure_count: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            failure_threshold: failure_threshold.max(1),
            open_timeout,
        }
    }

    pub fn can_execute(&self) -> bool {
        let state = *self.state.read().unwrap_or_else(|e| e.into_inner());
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .map_or(true, |at| at.elapsed() >= self.open_timeout);
                if cooled_down {
                    *self.state.write().unwrap_or_else(|e| e.into_inner()) = CircuitState::HalfOpen;
                    info!("notification circuit breaker half-open, sending probe");
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == CircuitState::HalfOpen {
            info!("notification circuit breaker closed again");
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match *state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                *state = CircuitState::Open;
                error!(
                    failures,
                    threshold = self.failure_threshold,
                    "notification circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("notification probe failed, circuit breaker open again");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("circuit breaker is open, notification dropped")]
    Open,
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct HttpNotificationPublisher {
    url: String,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl HttpNotificationPublisher {
    pub fn new(url: impl Into<String>, config: &NotificationConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
            breaker: Arc::new(CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs(config.open_timeout_secs),
            )),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if !self.breaker.can_execute() {
            return Err(NotifyError::Open);
        }
        let result = self
            .http
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(_) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(NotifyError::Http(e))
            }
        }
    }
}

impl NotificationPublisher for HttpNotificationPublisher {
    fn publish(&self, notification: Notification) {
        let publisher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.send(&notification).await {
                warn!(kind = ?notification.kind, user_id = %notification.user_id, error = %e, "notification not delivered");
            }
        });
    }
}

/// Без внешнего сервиса уведомления просто пишутся в лог.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationPublisher;

impl NotificationPublisher for LogNotificationPublisher {
    fn publish(&self, notification: Notification) {
        info!(
            kind = ?notification.kind,
            event_id = %notification.event_id,
            user_id = %notification.user_id,
            seats = ?notification.seats,
            "notification"
        );
    }
}

/// Копит уведомления в памяти (для тестов).
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }
}

impl NotificationPublisher for MemoryPublisher {
    fn publish(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Ошибки бизнес-операций бронирования.
///
/// Любая ошибка внутри транзакции откатывает её целиком: частично
/// назначенные места никогда не фиксируются.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    /// Место уже занято, дубликат idempotency-ключа, место удерживает другой клиент.
    #[error("{message}")]
    Conflict { message: String, seats: Vec<i32> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Оффер из листа ожидания просрочен или уже недействителен.
    #[error("offer no longer valid: {0}")]
    OfferExpired(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            seats: Vec::new(),
        }
    }

    pub fn seats_taken(seats: Vec<i32>) -> Self {
        let list = seats
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        AppError::Conflict {
            message: format!("Seat(s) {} are already booked", list),
            seats,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        AppError::InvalidInput(reason.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::OfferExpired(_) => StatusCode::GONE,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Conflict { .. } => "conflict",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::OfferExpired(_) => "offer_expired",
            AppError::Transient(_) => "transient",
            AppError::Database(_) => "internal",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    occupied_seats: Vec<i32>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Детали SQL наружу не отдаём
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let occupied_seats = match &self {
            AppError::Conflict { seats, .. } => seats.clone(),
            _ => Vec::new(),
        };
        let body = ErrorBody {
            error: self.code(),
            message,
            occupied_seats,
        };
        (status, Json(body)).into_response()
    }
}

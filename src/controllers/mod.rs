pub mod bookings;
pub mod events;
pub mod realtime;
pub mod waitlist;

use axum::Router;
use std::sync::Arc;
use validator::Validate;

use crate::error::{AppError, AppResult};

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(bookings::routes())
        .merge(waitlist::routes())
        .merge(events::routes())
        .merge(realtime::routes())
}

// Проверка тела запроса до любых обращений к хранилищам
pub(crate) fn validated<T: Validate>(body: T) -> AppResult<T> {
    body.validate()
        .map_err(|e| AppError::invalid(e.to_string()))?;
    Ok(body)
}

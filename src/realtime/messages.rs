use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Кадры от клиента. JSON с полем `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        event_id: Uuid,
    },
    Hold {
        event_id: Uuid,
        seat_no: i32,
        #[serde(default)]
        ttl_secs: Option<u64>,
        #[serde(default)]
        request_id: Option<String>,
    },
    Release {
        event_id: Uuid,
        seat_no: i32,
        #[serde(default)]
        request_id: Option<String>,
    },
    SnapshotRequest {
        event_id: Uuid,
    },
    Leave {
        event_id: Uuid,
    },
}

/// Кадры от сервера: ответы на запросы и события комнаты.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Hello {
        connection_id: String,
        reconcile_interval_ms: u64,
        hold_ttl_secs: u64,
    },
    Reply {
        request_id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Snapshot {
        event_id: Uuid,
        held: Vec<i32>,
    },
    Held {
        event_id: Uuid,
        seat_no: i32,
    },
    Released {
        event_id: Uuid,
        seat_no: i32,
    },
    Booked {
        event_id: Uuid,
        seat_no: i32,
    },
    Freed {
        event_id: Uuid,
        seat_no: Option<i32>,
    },
    AvailabilityUpdated {
        event_id: Uuid,
        available: i32,
    },
    SeatAvailableForYou {
        event_id: Uuid,
        seat_no: Option<i32>,
        expires_at: DateTime<Utc>,
        countdown_secs: i64,
        message: String,
    },
    WaitlistSeatConfirmed {
        event_id: Uuid,
        user_id: Uuid,
        seat_no: i32,
    },
}

impl ServerEvent {
    pub fn ok(request_id: Option<String>, ttl_secs: Option<u64>) -> Self {
        ServerEvent::Reply {
            request_id,
            ok: true,
            ttl_secs,
            error: None,
        }
    }

    pub fn failed(request_id: Option<String>, error: &str) -> Self {
        ServerEvent::Reply {
            request_id,
            ok: false,
            ttl_secs: None,
            error: Some(error.to_string()),
        }
    }
}

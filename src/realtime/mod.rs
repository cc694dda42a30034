//! Канал реального времени: протокол холдов, комнаты событий и
//! межпроцессная раздача.

pub mod coordinator;
pub mod fanout;
pub mod hub;
pub mod messages;

pub use self::coordinator::SeatHoldCoordinator;
pub use self::hub::{Audience, RoomHub};
pub use self::messages::{ClientMessage, ServerEvent};

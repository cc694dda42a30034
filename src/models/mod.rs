pub mod booking;
pub mod event;
pub mod seat;
pub mod waitlist;

pub use booking::{Booking, BookingStatus};
pub use event::{Event, EventStatus, SeatMap};
pub use seat::{BookingSeat, SeatStatus};
pub use waitlist::{WaitlistEntry, WaitlistStatus};

// Статусы хранятся в БД текстом; макрос даёт as_str/FromStr/Display
macro_rules! text_status {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::error::AppError::Transient(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_status;

//! Alert delivery.
//!
//! This crate provides:
//! - `Notifier` trait for the outbound message channel
//! - Telegram Bot API implementation with quiet hours
//! - Minijinja rendering of slot alerts, including the booking deep link

pub mod quiet_hours;
pub mod telegram;
pub mod templating;
pub mod traits;

pub use quiet_hours::QuietHours;
pub use telegram::TelegramNotifier;
pub use templating::{AlertContext, AlertRenderer};
pub use traits::{Notifier, NotifyError};

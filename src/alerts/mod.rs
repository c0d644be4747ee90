//! Alert creation and delivery.
//!
//! The factory fans a qualifying signal out into per-subscriber alert rows;
//! the dispatcher drains those rows through the notification channels and
//! records a terminal status per attempt.

pub mod channels;
pub mod dispatcher;
pub mod factory;

pub use channels::{ChannelError, EmailChannel, NotificationChannel, TelegramChannel};
pub use dispatcher::{AlertDispatcher, DispatchOutcome};
pub use factory::AlertFactory;

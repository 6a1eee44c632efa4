//! Notifications
//!
//! Best-effort delivery only: a failed or slow notification must never
//! block or fail the trading pipeline.

pub mod telegram;

pub use telegram::Notifier;

//! Dashboard client core: session tokens, route guarding, job polling and
//! toast notifications.

pub mod auth;
pub mod clock;
pub mod config;
pub mod notifications;
pub mod poller;

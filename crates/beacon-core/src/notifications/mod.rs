//! Transient toast notifications.
//!
//! - `countdown.rs`: pausable auto-dismiss timer
//! - `queue.rs`: the toast list and its eviction rules (pure, instant-driven)
//! - `center.rs`: async owner that drives the queue's timers

mod center;
mod countdown;
mod queue;

use std::time::Duration;

pub use center::NotificationCenter;
pub use countdown::{Countdown, CountdownState};
use serde::{Deserialize, Serialize};
pub use queue::{Toast, ToastId, ToastQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// What a caller asks to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastOptions {
    pub message: String,
    pub severity: Severity,
    /// Overrides the severity default.
    pub duration: Option<Duration>,
    /// Label of an optional action button.
    pub action: Option<String>,
}

impl ToastOptions {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            duration: None,
            action: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_action(mut self, label: impl Into<String>) -> Self {
        self.action = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastConfig {
    pub max_visible: usize,
    pub exit_animation: Duration,
    pub success: Duration,
    pub info: Duration,
    pub warning: Duration,
    pub error: Duration,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            max_visible: 3,
            exit_animation: Duration::from_millis(250),
            success: Duration::from_millis(4000),
            info: Duration::from_millis(5000),
            warning: Duration::from_millis(7000),
            error: Duration::from_millis(10_000),
        }
    }
}

impl ToastConfig {
    pub fn duration_for(&self, severity: Severity) -> Duration {
        match severity {
            Severity::Success => self.success,
            Severity::Info => self.info,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
        }
    }
}

//! Route guard state machine.
//!
//! Gates a protected view behind [`AuthStore`]. The guard itself never
//! navigates or shows anything; it returns [`GuardEffect`]s for the caller to
//! perform and a [`GuardView`] describing what to draw.

use tokio::sync::watch;

use super::api::AuthApi;
use super::store::{AuthState, AuthStore};
use crate::notifications::{Severity, ToastOptions};

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Checking,
    Authenticated,
    Error,
    Unauthenticated,
}

/// Screen-reader urgency for an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AriaLive {
    Polite,
    Assertive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardView {
    /// Non-interactive loading overlay.
    Loading { aria_live: AriaLive },
    /// Blocking overlay whose button should call [`RouteGuard::retry`].
    RetryOverlay {
        message: String,
        aria_live: AriaLive,
    },
    /// Render the protected content.
    Children,
    /// Render nothing; a redirect is on its way.
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardEffect {
    Notify(ToastOptions),
    /// Navigate to this path (query included).
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    fallback_path: String,
    current_path: String,
    phase: GuardPhase,
    was_authenticated: bool,
    error: Option<String>,
}

impl RouteGuard {
    pub fn new(fallback_path: impl Into<String>, current_path: impl Into<String>) -> Self {
        Self {
            fallback_path: fallback_path.into(),
            current_path: current_path.into(),
            phase: GuardPhase::Checking,
            was_authenticated: false,
            error: None,
        }
    }

    pub fn phase(&self) -> GuardPhase {
        self.phase
    }

    pub fn set_current_path(&mut self, path: impl Into<String>) {
        self.current_path = path.into();
    }

    /// First render: always runs the store's auth check.
    pub async fn mount<A: AuthApi>(&mut self, store: &AuthStore<A>) -> Vec<GuardEffect> {
        self.phase = GuardPhase::Checking;
        let ok = store.check_auth().await;
        self.on_check_finished(ok, &store.state())
    }

    /// The retry overlay's action.
    pub async fn retry<A: AuthApi>(&mut self, store: &AuthStore<A>) -> Vec<GuardEffect> {
        self.phase = GuardPhase::Checking;
        let ok = store.refresh_auth().await;
        self.on_check_finished(ok, &store.state())
    }

    fn on_check_finished(&mut self, ok: bool, state: &AuthState) -> Vec<GuardEffect> {
        if ok {
            self.phase = GuardPhase::Authenticated;
            self.error = None;
        } else {
            self.phase = GuardPhase::Error;
            self.error.clone_from(&state.error);
        }
        self.handle_state(state)
    }

    /// Feeds a store update through the guard.
    ///
    /// Only a drop from a settled authenticated state to unauthenticated
    /// counts as a logout; checks in progress never update the baseline.
    pub fn handle_state(&mut self, state: &AuthState) -> Vec<GuardEffect> {
        if state.is_checking {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.was_authenticated && !state.is_authenticated {
            tracing::info!(path = %self.current_path, "session ended; redirecting");
            self.phase = GuardPhase::Unauthenticated;
            effects.push(GuardEffect::Notify(ToastOptions::new(
                SESSION_EXPIRED_MESSAGE,
                Severity::Warning,
            )));
            effects.push(GuardEffect::Redirect(self.redirect_target()));
        } else if state.is_authenticated {
            self.phase = GuardPhase::Authenticated;
            self.error = None;
        }
        self.was_authenticated = state.is_authenticated;
        effects
    }

    /// Waits for the next store update and handles it. `None` once the store
    /// is gone.
    pub async fn next_effects(
        &mut self,
        updates: &mut watch::Receiver<AuthState>,
    ) -> Option<Vec<GuardEffect>> {
        updates.changed().await.ok()?;
        let state = updates.borrow_and_update().clone();
        Some(self.handle_state(&state))
    }

    pub fn view(&self) -> GuardView {
        match self.phase {
            GuardPhase::Checking => GuardView::Loading {
                aria_live: AriaLive::Polite,
            },
            GuardPhase::Error => GuardView::RetryOverlay {
                message: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unable to verify your session.".to_string()),
                aria_live: AriaLive::Assertive,
            },
            GuardPhase::Authenticated => GuardView::Children,
            GuardPhase::Unauthenticated => GuardView::Nothing,
        }
    }

    fn redirect_target(&self) -> String {
        if self.current_path == self.fallback_path {
            return self.fallback_path.clone();
        }
        let encoded: String =
            url::form_urlencoded::byte_serialize(self.current_path.as_bytes()).collect();
        let separator = if self.fallback_path.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{separator}returnUrl={encoded}", self.fallback_path)
    }
}

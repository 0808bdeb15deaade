//! Shared auth state consumed by route guards.
//!
//! One store per app. `init()` starts mirroring the token manager into the
//! store's state; `dispose()` (or drop) stops it.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::api::{AuthApi, Credentials};
use super::manager::{AuthError, SessionSnapshot, TokenManager};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub is_checking: bool,
    pub error: Option<String>,
}

pub struct AuthStore<A> {
    manager: TokenManager<A>,
    state: Arc<watch::Sender<AuthState>>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl<A: AuthApi> AuthStore<A> {
    pub fn new(manager: TokenManager<A>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            manager,
            state: Arc::new(state),
            bridge: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &TokenManager<A> {
        &self.manager
    }

    /// Starts following session changes. Calling it again is a no-op.
    pub fn init(&self) {
        let mut bridge = self.bridge.lock().unwrap_or_else(PoisonError::into_inner);
        if bridge.is_some() {
            return;
        }

        let mut session = self.manager.subscribe();
        let state = Arc::clone(&self.state);
        apply_session(&state, &session.borrow_and_update());
        *bridge = Some(tokio::spawn(async move {
            while session.changed().await.is_ok() {
                let snapshot = session.borrow_and_update().clone();
                apply_session(&state, &snapshot);
            }
        }));
        tracing::debug!("auth store initialised");
    }

    /// Stops following session changes. Subscribers keep the last state.
    pub fn dispose(&self) {
        let handle = self
            .bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("auth store disposed");
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Validates the held token, refreshing once if it is missing or stale.
    pub async fn check_auth(&self) -> bool {
        self.begin_check();
        let ok = if self.manager.validate_token().valid {
            true
        } else {
            self.refresh_and_validate().await
        };
        self.finish_check(ok);
        ok
    }

    /// Forces a refresh, e.g. from a "retry" button.
    pub async fn refresh_auth(&self) -> bool {
        self.begin_check();
        let ok = self.refresh_and_validate().await;
        self.finish_check(ok);
        ok
    }

    /// # Errors
    /// Returns the login failure; the store state is left unauthenticated.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let result = self.manager.login(credentials).await;
        self.finish_check(result.is_ok() && self.manager.is_authenticated());
        result
    }

    pub async fn logout(&self) {
        self.manager.logout().await;
        apply_session(&self.state, &self.manager.snapshot());
    }

    async fn refresh_and_validate(&self) -> bool {
        match self.manager.refresh_token().await {
            Ok(()) => self.manager.validate_token().valid,
            Err(err) => {
                tracing::debug!("auth check refresh failed: {err}");
                false
            }
        }
    }

    fn begin_check(&self) {
        self.state.send_modify(|s| s.is_checking = true);
    }

    fn finish_check(&self, ok: bool) {
        let error = if ok {
            None
        } else {
            Some(
                self.manager
                    .snapshot()
                    .refresh_error
                    .map_or_else(|| "Not signed in".to_string(), |e| e.to_string()),
            )
        };
        self.state.send_modify(|s| {
            s.is_checking = false;
            s.is_authenticated = ok;
            s.error = error;
        });
    }
}

impl<A> Drop for AuthStore<A> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .bridge
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Mirrors the session's authenticated flag. Ignored while a check runs so
/// the check's own outcome is what subscribers see.
fn apply_session(state: &watch::Sender<AuthState>, session: &SessionSnapshot) {
    state.send_if_modified(|s| {
        if s.is_checking || s.is_authenticated == session.is_authenticated {
            return false;
        }
        s.is_authenticated = session.is_authenticated;
        s.error = session.refresh_error.as_ref().map(ToString::to_string);
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{ScriptedAuthApi, settle};
    use crate::auth::token::test_tokens::expiring_at;
    use crate::clock::ManualClock;

    const NOW_SECS: u64 = 1_700_000_000;

    fn store_with(api: ScriptedAuthApi) -> AuthStore<ScriptedAuthApi> {
        let manager = TokenManager::builder(api)
            .clock(ManualClock::new(NOW_SECS * 1000))
            .build();
        AuthStore::new(manager)
    }

    #[tokio::test]
    async fn test_check_auth_with_valid_token_skips_refresh() {
        let store = store_with(ScriptedAuthApi::default());
        store
            .manager()
            .set_token(expiring_at("u1", NOW_SECS + 3600))
            .unwrap();

        assert!(store.check_auth().await);
        assert_eq!(store.manager().api().refresh_calls(), 0);
        let state = store.state();
        assert!(state.is_authenticated);
        assert!(!state.is_checking);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_check_auth_without_token_uses_refresh_cookie() {
        let api = ScriptedAuthApi::default();
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let store = store_with(api);

        assert!(store.check_auth().await);
        assert_eq!(store.manager().api().refresh_calls(), 1);
        assert!(store.state().is_authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_auth_failure_records_error() {
        let store = store_with(ScriptedAuthApi::default());

        assert!(!store.check_auth().await);
        let state = store.state();
        assert!(!state.is_authenticated);
        assert!(!state.is_checking);
        assert!(state.error.unwrap().contains("4 attempts"));
    }

    #[tokio::test]
    async fn test_init_mirrors_session_changes_until_dispose() {
        let store = store_with(ScriptedAuthApi::default());
        store.init();
        let mut rx = store.subscribe();

        store
            .manager()
            .set_token(expiring_at("u1", NOW_SECS + 3600))
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated);

        store.manager().clear_token();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_authenticated);

        store.dispose();
        store
            .manager()
            .set_token(expiring_at("u1", NOW_SECS + 3600))
            .unwrap();
        settle().await;
        assert!(!store.state().is_authenticated);
    }

    #[tokio::test]
    async fn test_logout_updates_state() {
        let api = ScriptedAuthApi::default();
        api.push_login(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let store = store_with(api);
        let creds = Credentials {
            email: "a@b.c".into(),
            password: "pw".into(),
        };

        store.login(&creds).await.unwrap();
        assert!(store.state().is_authenticated);

        store.logout().await;
        assert!(!store.state().is_authenticated);
    }
}

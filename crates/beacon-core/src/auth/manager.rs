//! In-memory session token owner.
//!
//! The access token lives only in this process. Refresh goes through the
//! HttpOnly cookie held by the [`AuthApi`] transport, is shared between all
//! concurrent callers, and is scheduled ahead of expiry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::api::{AuthApi, AuthApiError, Credentials};
use super::token::{Claims, TokenError, TokenValidation, decode_claims};
use crate::clock::{SharedClock, SystemClock};

/// Refresh timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh this long before expiry.
    pub lead: Duration,
    /// Sleep before retry `i`; one retry per entry.
    pub retry_delays: Vec<Duration>,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead: Duration::from_secs(5 * 60),
            retry_delays: vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ],
        }
    }
}

impl RefreshPolicy {
    /// Initial attempt plus one per retry delay.
    pub fn max_attempts(&self) -> usize {
        self.retry_delays.len() + 1
    }

    /// How long to wait before refreshing a token expiring at `expires_at`.
    pub fn refresh_delay(&self, expires_at_millis: u64, now_millis: u64) -> Duration {
        let lead = u64::try_from(self.lead.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(
            expires_at_millis
                .saturating_sub(lead)
                .saturating_sub(now_millis),
        )
    }
}

/// Failure of a single login or refresh exchange.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] AuthApiError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("token refresh failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: AuthError,
    },
    /// The session was cleared while the refresh was running.
    #[error("session ended during token refresh")]
    Superseded,
    #[error("token refresh task aborted")]
    Aborted,
}

type ExpiredCallback = Arc<dyn Fn() + Send + Sync>;
type SharedRefresh = Shared<BoxFuture<'static, Result<(), RefreshError>>>;

/// Observable session state.
#[derive(Clone, Default)]
pub struct SessionSnapshot {
    pub token: Option<String>,
    pub is_authenticated: bool,
    pub is_refreshing: bool,
    /// Epoch milliseconds.
    pub expires_at: Option<u64>,
    pub refresh_error: Option<RefreshError>,
}

impl std::fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("is_authenticated", &self.is_authenticated)
            .field("is_refreshing", &self.is_refreshing)
            .field("expires_at", &self.expires_at)
            .field("refresh_error", &self.refresh_error)
            .finish()
    }
}

#[derive(Default)]
struct State {
    token: Option<String>,
    claims: Option<Claims>,
    refresh_error: Option<RefreshError>,
    /// Epoch that started the refresh, and the future every caller awaits.
    in_flight: Option<(u64, SharedRefresh)>,
    scheduler: Option<JoinHandle<()>>,
    /// Bumped by `clear_token`; work started under an older epoch is dropped.
    epoch: u64,
}

impl State {
    fn wipe(&mut self) -> Option<JoinHandle<()>> {
        self.token = None;
        self.claims = None;
        self.epoch = self.epoch.wrapping_add(1);
        self.in_flight = None;
        self.scheduler.take()
    }
}

struct Inner<A> {
    api: A,
    clock: SharedClock,
    policy: RefreshPolicy,
    on_expired: Option<ExpiredCallback>,
    state: Mutex<State>,
    updates: watch::Sender<SessionSnapshot>,
}

impl<A> Inner<A> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> Drop for Inner<A> {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().scheduler.take() {
            handle.abort();
        }
    }
}

pub struct TokenManagerBuilder<A> {
    api: A,
    clock: SharedClock,
    policy: RefreshPolicy,
    on_expired: Option<ExpiredCallback>,
}

impl<A: AuthApi> TokenManagerBuilder<A> {
    #[must_use]
    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Called with no arguments each time an expired token is detected.
    #[must_use]
    pub fn on_token_expired(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_expired = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> TokenManager<A> {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        TokenManager {
            inner: Arc::new(Inner {
                api: self.api,
                clock: self.clock,
                policy: self.policy,
                on_expired: self.on_expired,
                state: Mutex::new(State::default()),
                updates,
            }),
        }
    }
}

/// Sole owner of the bearer token. Cheap to clone; clones share the session.
pub struct TokenManager<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for TokenManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AuthApi> TokenManager<A> {
    pub fn builder(api: A) -> TokenManagerBuilder<A> {
        TokenManagerBuilder {
            api,
            clock: Arc::new(SystemClock),
            policy: RefreshPolicy::default(),
            on_expired: None,
        }
    }

    pub fn new(api: A) -> Self {
        Self::builder(api).build()
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Current bearer token, if one is held and unexpired.
    pub fn token(&self) -> Option<String> {
        let now = self.inner.clock.now_millis();
        let state = self.inner.lock();
        match &state.claims {
            Some(claims) if claims.expires_at_millis() > now => state.token.clone(),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.inner.clock.now_millis();
        let state = self.inner.lock();
        let expires_at = state.claims.as_ref().map(Claims::expires_at_millis);
        SessionSnapshot {
            token: state.token.clone(),
            is_authenticated: state.token.is_some() && expires_at.is_some_and(|exp| now < exp),
            is_refreshing: state.in_flight.is_some(),
            expires_at,
            refresh_error: state.refresh_error.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.updates.subscribe()
    }

    fn publish(&self) {
        self.inner.updates.send_replace(self.snapshot());
    }

    /// Checks the held token against the clock. No side effects.
    pub fn validate_token(&self) -> TokenValidation {
        let claims = self.inner.lock().claims.clone();
        match claims {
            Some(claims) => TokenValidation::at(claims, self.inner.clock.now_millis()),
            None => TokenValidation::missing(),
        }
    }

    /// Stores a new access token and reschedules the proactive refresh.
    ///
    /// An already expired token fires `on_token_expired`, clears the session
    /// and starts a refresh right away.
    ///
    /// # Errors
    /// Returns `TokenError` if the token is malformed or lacks `exp`; the
    /// current session is left untouched in that case.
    pub fn set_token(&self, raw: impl Into<String>) -> Result<(), TokenError> {
        self.store_token(raw.into(), None).map(|_| ())
    }

    /// Returns `Ok(false)` when `epoch` no longer matches and nothing was stored.
    fn store_token(&self, raw: String, epoch: Option<u64>) -> Result<bool, TokenError> {
        let claims = decode_claims(&raw)?;
        let expires_at = claims.expires_at_millis();
        let stored_epoch = {
            let mut state = self.inner.lock();
            if epoch.is_some_and(|e| e != state.epoch) {
                return Ok(false);
            }
            state.token = Some(raw);
            state.claims = Some(claims);
            state.refresh_error = None;
            state.epoch
        };
        tracing::debug!(expires_at, "access token stored");

        if self.check_expiry() {
            // The refresh cookie may outlive the access token.
            if epoch.is_none() {
                let epoch = self.inner.lock().epoch;
                self.schedule_refresh(expires_at, epoch);
            }
        } else {
            self.schedule_refresh(expires_at, stored_epoch);
            self.publish();
        }
        Ok(true)
    }

    /// Drops the token, its expiry and any refresh error; cancels the refresh timer.
    pub fn clear_token(&self) {
        let handle = {
            let mut state = self.inner.lock();
            state.refresh_error = None;
            state.wipe()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        self.publish();
    }

    /// Fires `on_token_expired` and clears the session if the held token has
    /// expired. Returns whether that happened.
    pub fn check_expiry(&self) -> bool {
        let now = self.inner.clock.now_millis();
        let handle = {
            let mut state = self.inner.lock();
            let expired = state.token.is_some()
                && state
                    .claims
                    .as_ref()
                    .is_none_or(|c| c.expires_at_millis() <= now);
            if !expired {
                return false;
            }
            state.wipe()
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        tracing::info!("access token expired; session cleared");
        if let Some(callback) = &self.inner.on_expired {
            callback();
        }
        self.publish();
        true
    }

    /// Posts credentials to the login endpoint and stores the returned token.
    ///
    /// # Errors
    /// Returns the transport failure or the decode failure of the returned token.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let raw = self.inner.api.login(credentials).await?.into_token()?;
        self.set_token(raw)?;
        tracing::info!("logged in");
        Ok(())
    }

    /// Ends the session. The server call is best effort; local state is
    /// always cleared.
    pub async fn logout(&self) {
        if let Err(err) = self.inner.api.logout().await {
            tracing::debug!("logout request failed: {err}");
        }
        self.clear_token();
        tracing::info!("logged out");
    }

    /// Refreshes the access token, joining a refresh already in flight.
    ///
    /// After the last retry fails the session is cleared and the error is kept
    /// in [`SessionSnapshot::refresh_error`]; it is also returned here for
    /// callers that care.
    ///
    /// # Errors
    /// Returns `RefreshError` when every attempt failed or the session was
    /// cleared mid-refresh.
    pub async fn refresh_token(&self) -> Result<(), RefreshError> {
        let (shared, started) = {
            let mut state = self.inner.lock();
            match &state.in_flight {
                Some((_, shared)) => (shared.clone(), false),
                None => {
                    let epoch = state.epoch;
                    let manager = self.clone();
                    let task = tokio::spawn(async move { manager.run_refresh(epoch).await });
                    let shared = async move { task.await.unwrap_or(Err(RefreshError::Aborted)) }
                        .boxed()
                        .shared();
                    state.in_flight = Some((epoch, shared.clone()));
                    (shared, true)
                }
            }
        };
        if started {
            self.publish();
        }
        shared.await
    }

    async fn run_refresh(self, epoch: u64) -> Result<(), RefreshError> {
        let result = self.refresh_attempts(epoch).await;

        {
            let mut state = self.inner.lock();
            if state.in_flight.as_ref().is_some_and(|(e, _)| *e == epoch) {
                state.in_flight = None;
            }
            if let Err(err @ RefreshError::Exhausted { .. }) = &result
                && state.epoch == epoch
            {
                let handle = state.wipe();
                state.refresh_error = Some(err.clone());
                if let Some(handle) = handle {
                    handle.abort();
                }
            }
        }
        self.publish();
        result
    }

    async fn refresh_attempts(&self, epoch: u64) -> Result<(), RefreshError> {
        let policy = &self.inner.policy;
        let mut last = None;

        for attempt in 0..policy.max_attempts() {
            if let Some(delay) = attempt.checked_sub(1).map(|i| policy.retry_delays[i]) {
                tokio::time::sleep(delay).await;
            }
            if self.inner.lock().epoch != epoch {
                return Err(RefreshError::Superseded);
            }

            let outcome = match self.inner.api.refresh().await {
                Ok(response) => response
                    .into_token()
                    .map_err(AuthError::from)
                    .and_then(|raw| self.store_token(raw, Some(epoch)).map_err(AuthError::from)),
                Err(err) => Err(AuthError::from(err)),
            };
            match outcome {
                Ok(true) => {
                    tracing::info!(attempt, "access token refreshed");
                    return Ok(());
                }
                Ok(false) => return Err(RefreshError::Superseded),
                Err(err) => {
                    tracing::warn!(attempt, "token refresh attempt failed: {err}");
                    last = Some(err);
                }
            }
        }

        Err(RefreshError::Exhausted {
            attempts: policy.max_attempts(),
            last: last.unwrap_or(AuthError::Api(AuthApiError::MissingToken)),
        })
    }

    /// Replaces the refresh timer for a token expiring at `expires_at`.
    ///
    /// Nothing is installed if the session moved past `epoch` meanwhile.
    fn schedule_refresh(&self, expires_at: u64, epoch: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; proactive token refresh disabled");
            return;
        };

        let delay = self
            .inner
            .policy
            .refresh_delay(expires_at, self.inner.clock.now_millis());
        tracing::debug!(delay_ms = delay.as_millis(), "scheduling token refresh");

        let weak: Weak<Inner<A>> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.lock().epoch != epoch {
                return;
            }
            let manager = TokenManager { inner };
            // Failures land in refresh_error.
            let _ = manager.refresh_token().await;
        });

        let previous = {
            let mut state = self.inner.lock();
            if state.epoch == epoch {
                state.scheduler.replace(handle)
            } else {
                Some(handle)
            }
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::auth::testing::{ScriptedAuthApi, settle};
    use crate::auth::token::test_tokens::expiring_at;
    use crate::clock::{ManualClock, TokioClock};

    const NOW_SECS: u64 = 1_700_000_000;

    fn manager_at(api: ScriptedAuthApi, now_secs: u64) -> TokenManager<ScriptedAuthApi> {
        TokenManager::builder(api)
            .clock(ManualClock::new(now_secs * 1000))
            .build()
    }

    #[tokio::test]
    async fn test_future_token_is_valid() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();

        let validation = manager.validate_token();
        assert!(validation.valid);
        assert_eq!(validation.expires_in_ms, 3_600_000);
        assert!(manager.is_authenticated());
        assert_eq!(manager.snapshot().expires_at, Some((NOW_SECS + 3600) * 1000));
    }

    #[tokio::test]
    async fn test_past_token_fires_expired_callback_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let manager = TokenManager::builder(ScriptedAuthApi::default())
            .clock(ManualClock::new(NOW_SECS * 1000))
            .on_token_expired(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS - 10)).unwrap();

        assert!(!manager.is_authenticated());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(manager.snapshot().token.is_none());

        // Nothing left to expire.
        assert!(!manager.check_expiry());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_far_future_token_validates_like_snapshot() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        manager
            .set_token(expiring_at("u1", 10_000_000_000_000_000))
            .unwrap();

        let validation = manager.validate_token();
        assert!(validation.valid);
        assert!(validation.expires_in_ms > 0);
        assert!(manager.snapshot().is_authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_token_refreshes_through_cookie_immediately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let api = ScriptedAuthApi::default();
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = TokenManager::builder(api)
            .clock(TokioClock::new(NOW_SECS * 1000))
            .on_token_expired(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS - 10)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        settle().await;

        assert_eq!(manager.api().refresh_calls(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(manager.is_authenticated());
        assert_eq!(
            manager.snapshot().expires_at,
            Some((NOW_SECS + 3600) * 1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_before_immediate_refresh_runs_cancels_it() {
        let api = ScriptedAuthApi::default();
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = TokenManager::builder(api)
            .clock(TokioClock::new(NOW_SECS * 1000))
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS - 10)).unwrap();
        manager.clear_token();
        settle().await;

        assert_eq!(manager.api().refresh_calls(), 0);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_schedule_for_stale_epoch_installs_nothing() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();
        let stale = manager.inner.lock().epoch;
        manager.clear_token();

        manager.schedule_refresh((NOW_SECS + 3600) * 1000, stale);
        assert!(manager.inner.lock().scheduler.is_none());
    }

    #[tokio::test]
    async fn test_token_expiring_later_is_detected_on_check() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let clock = ManualClock::new(NOW_SECS * 1000);
        let manager = TokenManager::builder(ScriptedAuthApi::default())
            .clock(clock.clone())
            .policy(RefreshPolicy {
                lead: Duration::ZERO,
                ..RefreshPolicy::default()
            })
            .on_token_expired(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS + 60)).unwrap();
        assert!(!manager.check_expiry());

        clock.advance_millis(61_000);
        assert!(!manager.validate_token().valid);
        assert!(!manager.is_authenticated());
        assert!(manager.check_expiry());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_token_is_rejected_and_session_kept() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();

        assert!(matches!(
            manager.set_token("not-a-jwt"),
            Err(TokenError::Segments(1))
        ));
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_clear_token_is_idempotent() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();

        manager.clear_token();
        let once = manager.snapshot();
        manager.clear_token();
        let twice = manager.snapshot();

        for snapshot in [once, twice] {
            assert!(snapshot.token.is_none());
            assert!(snapshot.expires_at.is_none());
            assert!(snapshot.refresh_error.is_none());
            assert!(!snapshot.is_authenticated);
        }
        assert!(!manager.validate_token().valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_request() {
        let api = ScriptedAuthApi::default().with_latency(Duration::from_millis(200));
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = manager_at(api, NOW_SECS);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.refresh_token().await }));
        }
        settle().await;
        assert!(manager.snapshot().is_refreshing);

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(manager.api().refresh_calls(), 1);
        assert!(manager.is_authenticated());
        assert!(!manager.snapshot().is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_retries_on_fixed_schedule_then_gives_up() {
        let api = ScriptedAuthApi::default();
        let manager = manager_at(api, NOW_SECS);
        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();

        let started = Instant::now();
        let result = manager.refresh_token().await;

        assert!(matches!(
            result,
            Err(RefreshError::Exhausted { attempts: 4, .. })
        ));
        assert!(started.elapsed() >= Duration::from_millis(7000));
        assert_eq!(manager.api().refresh_calls(), 4);

        let snapshot = manager.snapshot();
        assert!(snapshot.token.is_none());
        assert!(snapshot.refresh_error.is_some());
        assert!(!snapshot.is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_succeeds_on_third_attempt() {
        let api = ScriptedAuthApi::default();
        api.push_refresh(Err(AuthApiError::Status {
            status: 502,
            body: String::new(),
        }));
        api.push_refresh(Ok("garbage".to_string()));
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = manager_at(api, NOW_SECS);

        let started = Instant::now();
        manager.refresh_token().await.unwrap();

        assert_eq!(manager.api().refresh_calls(), 3);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(7000));
        assert!(manager.snapshot().refresh_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_token_clears_previous_refresh_error() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        let _ = manager.refresh_token().await;
        assert!(manager.snapshot().refresh_error.is_some());

        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();
        assert!(manager.snapshot().refresh_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_is_scheduled_before_expiry() {
        let api = ScriptedAuthApi::default();
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 1200)));
        let manager = TokenManager::builder(api)
            .clock(TokioClock::new(NOW_SECS * 1000))
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS + 600)).unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        settle().await;
        assert_eq!(manager.api().refresh_calls(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(manager.api().refresh_calls(), 1);
        assert_eq!(
            manager.snapshot().expires_at,
            Some((NOW_SECS + 1200) * 1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_token_refreshes_immediately() {
        let api = ScriptedAuthApi::default();
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = TokenManager::builder(api)
            .clock(TokioClock::new(NOW_SECS * 1000))
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS + 120)).unwrap();
        settle().await;

        assert_eq!(manager.api().refresh_calls(), 1);
        assert_eq!(
            manager.snapshot().expires_at,
            Some((NOW_SECS + 3600) * 1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_token_cancels_scheduled_refresh() {
        let manager = TokenManager::builder(ScriptedAuthApi::default())
            .clock(TokioClock::new(NOW_SECS * 1000))
            .build();

        manager.set_token(expiring_at("u1", NOW_SECS + 600)).unwrap();
        manager.clear_token();

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(manager.api().refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_result_after_clear_is_discarded() {
        let api = ScriptedAuthApi::default().with_latency(Duration::from_millis(500));
        api.push_refresh(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = manager_at(api, NOW_SECS);

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_token().await })
        };
        settle().await;
        manager.clear_token();

        assert!(matches!(
            pending.await.unwrap(),
            Err(RefreshError::Superseded)
        ));
        assert!(manager.snapshot().token.is_none());
        assert!(manager.snapshot().refresh_error.is_none());
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let api = ScriptedAuthApi::default();
        api.push_login(Ok(expiring_at("u1", NOW_SECS + 3600)));
        let manager = manager_at(api, NOW_SECS);

        let creds = Credentials {
            email: "a@b.c".into(),
            password: "pw".into(),
        };
        manager.login(&creds).await.unwrap();
        assert!(manager.is_authenticated());

        manager.api().fail_logout();
        manager.logout().await;
        assert!(!manager.is_authenticated());
        assert_eq!(manager.api().logout_calls(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_session_changes() {
        let manager = manager_at(ScriptedAuthApi::default(), NOW_SECS);
        let mut updates = manager.subscribe();

        manager.set_token(expiring_at("u1", NOW_SECS + 3600)).unwrap();
        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update().is_authenticated);

        manager.clear_token();
        updates.changed().await.unwrap();
        assert!(!updates.borrow_and_update().is_authenticated);
    }

    #[test]
    fn test_refresh_delay_respects_lead() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.refresh_delay(1_000_000, 0),
            Duration::from_millis(700_000)
        );
        assert_eq!(policy.refresh_delay(200_000, 0), Duration::ZERO);
        assert_eq!(policy.refresh_delay(0, 50), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_debug_redacts_token() {
        let snapshot = SessionSnapshot {
            token: Some("secret.jwt.value".into()),
            ..Default::default()
        };
        assert!(!format!("{snapshot:?}").contains("secret"));
    }
}

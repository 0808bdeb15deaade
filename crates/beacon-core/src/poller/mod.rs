//! Backoff polling of long-running job status.
//!
//! A [`JobPoller`] owns at most one poll chain. Each chain polls immediately,
//! then sleeps a growing interval (plus jitter) between calls until the job
//! reports a terminal status. Fetch errors are recorded and retried on the
//! same schedule.

mod http;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use http::{HttpJobStatus, JobRecord};

/// Statuses after which a job never changes again.
pub const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// Anything a status endpoint returns.
pub trait JobStatus {
    fn status(&self) -> &str;

    fn is_terminal(&self) -> bool {
        is_terminal_status(self.status())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    /// Each sleep moves by a uniform offset within this bound, either way.
    pub jitter: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(2000),
            max_interval: Duration::from_millis(10_000),
            backoff_factor: 1.5,
            jitter: Duration::from_millis(500),
        }
    }
}

impl PollerConfig {
    /// `clamp(current * backoff_factor, initial, max)`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let scaled = (current.as_millis() as f64 * self.backoff_factor).round();
        let scaled = if scaled.is_finite() && scaled > 0.0 {
            Duration::from_millis(scaled as u64)
        } else {
            Duration::ZERO
        };
        let ceiling = self.max_interval.max(self.initial_interval);
        scaled.clamp(self.initial_interval, ceiling)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum PollError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid job status payload: {0}")]
    Decode(String),
    #[error("not signed in")]
    Unauthenticated,
    #[error("{0}")]
    Fetch(String),
}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Observable poller state.
#[derive(Debug, Clone)]
pub struct PollState<P> {
    /// Last successful payload.
    pub data: Option<P>,
    /// Last fetch failure; cleared by the next success.
    pub error: Option<PollError>,
    pub is_polling: bool,
    /// Carried backoff interval, without jitter.
    pub current_interval: Duration,
    pub attempt_count: u32,
}

impl<P> PollState<P> {
    fn idle(interval: Duration) -> Self {
        Self {
            data: None,
            error: None,
            is_polling: false,
            current_interval: interval,
            attempt_count: 0,
        }
    }
}

type FetchFn<P> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<P, PollError>> + Send + Sync>;
/// Given the configured bound, returns a signed offset in milliseconds.
type JitterFn = Arc<dyn Fn(Duration) -> i64 + Send + Sync>;

/// Uniform offset in `[-bound, bound]` milliseconds.
pub fn random_jitter(bound: Duration) -> i64 {
    let bound = i64::try_from(bound.as_millis()).unwrap_or(i64::MAX);
    if bound == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(-bound..=bound)
}

fn jittered(interval: Duration, offset_ms: i64) -> Duration {
    let offset = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms < 0 {
        interval.saturating_sub(offset)
    } else {
        interval.saturating_add(offset)
    }
}

#[derive(Default)]
struct Chain {
    job_id: Option<String>,
    task: Option<JoinHandle<()>>,
    /// Bumped whenever the chain is replaced; stale tasks stop publishing.
    generation: u64,
}

impl Chain {
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Inner<P> {
    config: PollerConfig,
    fetch: FetchFn<P>,
    jitter: JitterFn,
    chain: Mutex<Chain>,
    updates: watch::Sender<PollState<P>>,
}

impl<P> Inner<P> {
    fn lock(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` only if `generation` is still the live chain.
    fn update(&self, generation: u64, f: impl FnOnce(&mut PollState<P>)) -> bool {
        let chain = self.lock();
        if chain.generation != generation {
            return false;
        }
        self.updates.send_modify(f);
        true
    }
}

pub struct JobPoller<P> {
    inner: Arc<Inner<P>>,
}

impl<P> JobPoller<P>
where
    P: JobStatus + Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(config: PollerConfig, fetch_status: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, PollError>> + Send + 'static,
    {
        Self::with_jitter(config, fetch_status, random_jitter)
    }

    /// Like [`new`](Self::new) with a custom jitter source.
    pub fn with_jitter<F, Fut>(
        config: PollerConfig,
        fetch_status: F,
        jitter: impl Fn(Duration) -> i64 + Send + Sync + 'static,
    ) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, PollError>> + Send + 'static,
    {
        let fetch: FetchFn<P> = Arc::new(move |id| fetch_status(id).boxed());
        let (updates, _) = watch::channel(PollState::idle(config.initial_interval));
        Self {
            inner: Arc::new(Inner {
                config,
                fetch,
                jitter: Arc::new(jitter),
                chain: Mutex::new(Chain::default()),
                updates,
            }),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    pub fn job_id(&self) -> Option<String> {
        self.inner.lock().job_id.clone()
    }

    pub fn snapshot(&self) -> PollState<P> {
        self.inner.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState<P>> {
        self.inner.updates.subscribe()
    }

    /// Switches to another job (or to none).
    ///
    /// The old chain is cancelled before the new one starts. Setting the
    /// current id again is a no-op. Must be called inside a tokio runtime.
    pub fn set_job(&self, job_id: Option<String>) {
        let mut chain = self.inner.lock();
        if chain.job_id == job_id {
            return;
        }
        chain.cancel();
        chain.job_id.clone_from(&job_id);
        self.inner
            .updates
            .send_replace(PollState::idle(self.inner.config.initial_interval));

        match job_id {
            Some(id) => {
                tracing::debug!(job_id = %id, "polling job");
                self.start(&mut chain, id);
            }
            None => tracing::debug!("polling stopped"),
        }
    }

    /// Cancels the pending poll, resets the interval and polls now.
    pub fn refresh(&self) {
        let mut chain = self.inner.lock();
        let Some(id) = chain.job_id.clone() else {
            return;
        };
        chain.cancel();
        self.start(&mut chain, id);
    }

    fn start(&self, chain: &mut Chain, job_id: String) {
        let generation = chain.generation;
        let inner = Arc::clone(&self.inner);
        chain.task = Some(tokio::spawn(run_chain(inner, job_id, generation)));
    }
}

impl<P> Drop for JobPoller<P> {
    fn drop(&mut self) {
        self.inner.lock().cancel();
    }
}

async fn run_chain<P>(inner: Arc<Inner<P>>, job_id: String, generation: u64)
where
    P: JobStatus + Clone + Send + Sync + 'static,
{
    let mut interval = inner.config.initial_interval;
    loop {
        let started = inner.update(generation, |state| {
            state.is_polling = true;
            state.attempt_count = state.attempt_count.saturating_add(1);
            state.current_interval = interval;
        });
        if !started {
            return;
        }

        let result = (inner.fetch)(job_id.clone()).await;
        let next = inner.config.next_interval(interval);

        let terminal = match result {
            Ok(data) => {
                let terminal = data.is_terminal();
                tracing::debug!(job_id = %job_id, status = data.status(), "job status");
                let live = inner.update(generation, |state| {
                    state.data = Some(data);
                    state.error = None;
                    state.is_polling = !terminal;
                    if !terminal {
                        state.current_interval = next;
                    }
                });
                if !live {
                    return;
                }
                terminal
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, "job status poll failed: {err}");
                let live = inner.update(generation, |state| {
                    state.error = Some(err);
                    state.is_polling = false;
                    state.current_interval = next;
                });
                if !live {
                    return;
                }
                false
            }
        };

        if terminal {
            return;
        }
        interval = next;
        let delay = jittered(next, (inner.jitter)(inner.config.jitter));
        tokio::time::sleep(delay).await;
    }
}

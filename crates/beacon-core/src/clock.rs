//! Wall-clock source for token expiry math.
//!
//! Timers use `tokio::time` (which tests can pause); expiry comparisons need
//! epoch time, which comes from here so tests can move it independently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| u64::try_from(d.as_millis()).ok())
            .unwrap_or(u64::MAX)
    }
}

/// Epoch clock anchored once and advanced by the tokio clock.
///
/// Under a paused tokio runtime this follows virtual time, so expiry and
/// timer math stay consistent with each other.
#[derive(Debug)]
pub struct TokioClock {
    anchor_millis: u64,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor_millis: u64) -> Arc<Self> {
        Arc::new(Self {
            anchor_millis,
            anchor: tokio::time::Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_millis.saturating_add(elapsed)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(now_millis),
        })
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

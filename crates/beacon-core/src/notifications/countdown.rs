//! Pausable countdown used for toast auto-dismiss.
//!
//! Pure state machine: every transition takes the current instant, so callers
//! decide where time comes from.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Running { deadline: Instant },
    Paused { remaining: Duration },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    duration: Duration,
    state: CountdownState,
}

impl Countdown {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: CountdownState::Idle,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    /// Starts from the full duration. Only valid from `Idle`.
    pub fn start(&mut self, now: Instant) {
        if self.state == CountdownState::Idle {
            self.state = CountdownState::Running {
                deadline: now + self.duration,
            };
        }
    }

    /// Freezes the remaining time.
    pub fn pause(&mut self, now: Instant) {
        if let CountdownState::Running { deadline } = self.state {
            self.state = CountdownState::Paused {
                remaining: deadline.saturating_duration_since(now),
            };
        }
    }

    /// Continues from where `pause` left off.
    pub fn resume(&mut self, now: Instant) {
        if let CountdownState::Paused { remaining } = self.state {
            self.state = CountdownState::Running {
                deadline: now + remaining,
            };
        }
    }

    pub fn cancel(&mut self) {
        self.state = CountdownState::Cancelled;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            CountdownState::Running { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match self.state {
            CountdownState::Idle => self.duration,
            CountdownState::Running { deadline } => deadline.saturating_duration_since(now),
            CountdownState::Paused { remaining } => remaining,
            CountdownState::Cancelled => Duration::ZERO,
        }
    }

    pub fn is_elapsed(&self, now: Instant) -> bool {
        matches!(self.state, CountdownState::Running { deadline } if now >= deadline)
    }

    /// Fraction of time left in `0.0..=1.0`, for progress bars.
    pub fn fraction_remaining(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 0.0;
        }
        (self.remaining(now).as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }
}

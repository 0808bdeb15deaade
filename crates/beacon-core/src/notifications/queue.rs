//! Toast list with bounded visible concurrency.
//!
//! Newest entries sit at the front. Entries are never dropped outright by
//! overflow or dismissal: they are first marked dismissing, kept for one exit
//! animation, then removed by [`ToastQueue::tick`].

use std::time::Duration;

use tokio::time::Instant;

use super::countdown::Countdown;
use super::{Severity, ToastConfig, ToastOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToastId(pub u64);

impl std::fmt::Display for ToastId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "toast-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub id: ToastId,
    pub message: String,
    pub severity: Severity,
    pub duration: Duration,
    pub action: Option<String>,
    pub is_dismissing: bool,
    countdown: Countdown,
    remove_at: Option<Instant>,
}

impl Toast {
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    /// When the exit animation ends and the entry leaves the list.
    pub fn remove_at(&self) -> Option<Instant> {
        self.remove_at
    }
}

#[derive(Debug, Default)]
pub struct ToastQueue {
    config: ToastConfig,
    entries: Vec<Toast>,
    next_id: u64,
}

impl ToastQueue {
    pub fn new(config: ToastConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Newest first.
    pub fn entries(&self) -> &[Toast] {
        &self.entries
    }

    pub fn get(&self, id: ToastId) -> Option<&Toast> {
        self.entries.iter().find(|t| t.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|t| !t.is_dismissing).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn show(&mut self, options: ToastOptions, now: Instant) -> ToastId {
        let id = ToastId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let duration = options
            .duration
            .unwrap_or_else(|| self.config.duration_for(options.severity));
        let mut countdown = Countdown::new(duration);
        countdown.start(now);

        self.entries.insert(
            0,
            Toast {
                id,
                message: options.message,
                severity: options.severity,
                duration,
                action: options.action,
                is_dismissing: false,
                countdown,
                remove_at: None,
            },
        );
        self.retire_overflow(now);
        id
    }

    /// Walks from the oldest end, marking active entries dismissing until at
    /// most `max_visible` remain active.
    fn retire_overflow(&mut self, now: Instant) {
        let mut active = self.active_count();
        let exit = self.config.exit_animation;
        for toast in self.entries.iter_mut().rev() {
            if active <= self.config.max_visible {
                break;
            }
            if !toast.is_dismissing {
                begin_exit(toast, now, exit);
                active -= 1;
            }
        }
    }

    /// Starts the exit animation for `id`. Returns false if the entry is
    /// unknown or already leaving.
    pub fn dismiss(&mut self, id: ToastId, now: Instant) -> bool {
        let exit = self.config.exit_animation;
        match self.entries.iter_mut().find(|t| t.id == id) {
            Some(toast) if !toast.is_dismissing => {
                begin_exit(toast, now, exit);
                true
            }
            _ => false,
        }
    }

    /// Splices `id` out of the list. If more than `max_visible` entries are
    /// still present afterwards, the oldest active one starts leaving too.
    pub fn remove(&mut self, id: ToastId, now: Instant) -> Option<Toast> {
        let index = self.entries.iter().position(|t| t.id == id)?;
        let removed = self.entries.remove(index);

        if self.entries.len() > self.config.max_visible {
            let exit = self.config.exit_animation;
            if let Some(oldest_active) = self.entries.iter_mut().rev().find(|t| !t.is_dismissing) {
                begin_exit(oldest_active, now, exit);
            }
        }
        Some(removed)
    }

    /// Hover/focus: freeze the auto-dismiss countdown.
    pub fn pause(&mut self, id: ToastId, now: Instant) {
        if let Some(toast) = self.entries.iter_mut().find(|t| t.id == id) {
            toast.countdown.pause(now);
        }
    }

    pub fn resume(&mut self, id: ToastId, now: Instant) {
        if let Some(toast) = self.entries.iter_mut().find(|t| t.id == id) {
            toast.countdown.resume(now);
        }
    }

    /// Empties the list without exit animations.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Applies everything due at `now`: elapsed countdowns start exiting,
    /// finished exits are removed (oldest first). Returns whether anything
    /// changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired: Vec<ToastId> = self
            .entries
            .iter()
            .filter(|t| t.countdown.is_elapsed(now))
            .map(|t| t.id)
            .collect();
        let mut changed = false;
        for id in expired {
            changed |= self.dismiss(id, now);
        }

        let finished: Vec<ToastId> = self
            .entries
            .iter()
            .rev()
            .filter(|t| t.remove_at.is_some_and(|at| at <= now))
            .map(|t| t.id)
            .collect();
        for id in finished {
            changed |= self.remove(id, now).is_some();
        }
        changed
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .flat_map(|t| [t.countdown.deadline(), t.remove_at])
            .flatten()
            .min()
    }
}

fn begin_exit(toast: &mut Toast, now: Instant, exit: Duration) {
    toast.is_dismissing = true;
    toast.countdown.cancel();
    toast.remove_at = Some(now + exit);
}

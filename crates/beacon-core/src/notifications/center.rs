//! Async owner of the toast list.
//!
//! A single driver task sleeps until the queue's next deadline (or until an
//! operation wakes it) and applies due transitions. Subscribers receive the
//! full list after every change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::queue::{Toast, ToastId, ToastQueue};
use super::{ToastConfig, ToastOptions};

struct Shared {
    queue: Mutex<ToastQueue>,
    wake: Notify,
    updates: watch::Sender<Vec<Toast>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ToastQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let entries = self.lock().entries().to_vec();
        self.updates.send_replace(entries);
    }
}

pub struct NotificationCenter {
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl NotificationCenter {
    /// Must be called inside a tokio runtime.
    pub fn new(config: ToastConfig) -> Self {
        let (updates, _) = watch::channel(Vec::new());
        let shared = Arc::new(Shared {
            queue: Mutex::new(ToastQueue::new(config)),
            wake: Notify::new(),
            updates,
        });
        let driver = tokio::spawn(drive(Arc::clone(&shared)));
        Self { shared, driver }
    }

    pub fn show(&self, options: ToastOptions) -> ToastId {
        tracing::debug!(severity = options.severity.label(), "toast: {}", options.message);
        let id = self.shared.lock().show(options, Instant::now());
        self.changed();
        id
    }

    pub fn dismiss(&self, id: ToastId) {
        if self.shared.lock().dismiss(id, Instant::now()) {
            self.changed();
        }
    }

    pub fn pause(&self, id: ToastId) {
        self.shared.lock().pause(id, Instant::now());
        self.changed();
    }

    pub fn resume(&self, id: ToastId) {
        self.shared.lock().resume(id, Instant::now());
        self.changed();
    }

    pub fn clear_all(&self) {
        self.shared.lock().clear_all();
        self.changed();
    }

    pub fn snapshot(&self) -> Vec<Toast> {
        self.shared.lock().entries().to_vec()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Toast>> {
        self.shared.updates.subscribe()
    }

    fn changed(&self) {
        self.shared.publish();
        self.shared.wake.notify_one();
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(shared: Arc<Shared>) {
    loop {
        let deadline = shared.lock().next_deadline();
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {}
                    () = shared.wake.notified() => {}
                }
            }
            None => shared.wake.notified().await,
        }

        let changed = shared.lock().tick(Instant::now());
        if changed {
            shared.publish();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::notifications::Severity;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_toast_auto_dismisses_after_duration_and_animation() {
        let center = NotificationCenter::new(ToastConfig::default());
        let id = center.show(ToastOptions::new("saved", Severity::Success));

        tokio::time::sleep(ms(3999)).await;
        assert!(!center.snapshot()[0].is_dismissing);

        tokio::time::sleep(ms(2)).await;
        assert!(center.snapshot()[0].is_dismissing);

        tokio::time::sleep(ms(250)).await;
        assert!(center.snapshot().iter().all(|t| t.id != id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_pause_resumes_with_remaining_time() {
        let center = NotificationCenter::new(ToastConfig::default());
        let id = center.show(ToastOptions::new("details", Severity::Info));

        tokio::time::sleep(ms(2000)).await;
        center.pause(id);
        tokio::time::sleep(ms(30_000)).await;
        assert!(!center.snapshot()[0].is_dismissing);

        center.resume(id);
        tokio::time::sleep(ms(2999)).await;
        assert!(!center.snapshot()[0].is_dismissing);
        tokio::time::sleep(ms(2)).await;
        assert!(center.snapshot()[0].is_dismissing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_dismiss_removes_after_animation() {
        let center = NotificationCenter::new(ToastConfig::default());
        let id = center.show(ToastOptions::new("boom", Severity::Error));

        center.dismiss(id);
        assert!(center.snapshot()[0].is_dismissing);
        tokio::time::sleep(ms(251)).await;
        assert!(center.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_overflow_and_clear() {
        let center = NotificationCenter::new(ToastConfig::default());
        let mut updates = center.subscribe();

        for n in 0..4 {
            center.show(ToastOptions::new(format!("n{n}"), Severity::Info));
        }
        updates.changed().await.unwrap();
        let list = updates.borrow_and_update().clone();
        assert_eq!(list.len(), 4);
        assert_eq!(list.iter().filter(|t| t.is_dismissing).count(), 1);
        assert_eq!(list[3].message, "n0");
        assert!(list[3].is_dismissing);

        center.clear_all();
        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update().is_empty());
    }
}

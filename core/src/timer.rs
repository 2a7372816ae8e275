use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Single-slot deferred action.
///
/// Scheduling replaces whatever is pending; a replaced or cancelled timer is
/// aborted, so it can never fire late. Once the delay has elapsed the action
/// leaves the slot and runs to completion even if a new timer is scheduled.
/// Must be used from within a Tokio runtime.
#[derive(Clone, Default)]
pub struct PendingTimer {
    slot: Arc<Mutex<Slot>>,
}

impl PendingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        let generation = slot.generation;
        let shared = Arc::downgrade(&self.slot);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            {
                let mut slot = shared
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
            }
            action.await;
        }));
    }

    /// Invalidates the pending action. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        slot.generation = slot.generation.wrapping_add(1);
        match slot.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock()
            .handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rescheduling_keeps_only_latest_action() {
        let timer = PendingTimer::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        for value in 1..=3 {
            let fired = fired.clone();
            timer.schedule(Duration::from_secs(5), async move {
                fired.lock().unwrap().push(value);
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*fired.lock().unwrap(), vec![3]);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_action_never_fires() {
        let timer = PendingTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        timer.schedule(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(timer.cancel());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.cancel());
    }
}

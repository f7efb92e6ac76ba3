use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::debug;

/// Handle returned by [`TimeoutRegistry::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(u64);

/// Tracks delayed callbacks so they can be cancelled in bulk at round or session boundaries.
///
/// A callback runs only if its entry is still tracked when the delay elapses; the
/// entry is removed before the callback starts, so a cancelled callback never runs.
#[derive(Clone, Default)]
pub struct TimeoutRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    epoch: AtomicU64,
    // `None` until the spawned task's abort handle is known.
    pending: DashMap<u64, Option<AbortHandle>>,
}

impl TimeoutRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay` unless cancelled first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F, Fut>(&self, delay: Duration, callback: F) -> TimeoutHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.insert(id, None);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.pending.remove(&id).is_none() {
                return;
            }
            callback().await;
        });

        let abort = task.abort_handle();
        match self.inner.pending.get_mut(&id) {
            Some(mut slot) => *slot = Some(abort),
            // Cancelled between insertion and spawn; the task skips the callback.
            None => abort.abort(),
        }

        TimeoutHandle(id)
    }

    /// Run `callback` after `delay`, unless [`TimeoutRegistry::cancel_all`] ran since `epoch`
    /// was read.
    ///
    /// Chained callbacks use this so a chain interrupted by a cancellation cannot
    /// re-arm itself from a callback that was already running.
    pub fn schedule_in_epoch<F, Fut>(
        &self,
        epoch: u64,
        delay: Duration,
        callback: F,
    ) -> Option<TimeoutHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.epoch() != epoch {
            return None;
        }
        let handle = self.schedule(delay, callback);
        // A `cancel_all` may have run between the check and the insertion.
        if self.epoch() != epoch {
            self.cancel(handle);
            return None;
        }
        Some(handle)
    }

    /// Counter bumped by every [`TimeoutRegistry::cancel_all`].
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Cancel one pending callback. Returns `false` when it already fired or was cancelled.
    pub fn cancel(&self, handle: TimeoutHandle) -> bool {
        match self.inner.pending.remove(&handle.0) {
            Some((_, abort)) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every pending callback and return how many were dropped.
    pub fn cancel_all(&self) -> usize {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let ids: Vec<u64> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        let cancelled = ids
            .into_iter()
            .filter(|id| self.cancel(TimeoutHandle(*id)))
            .count();
        if cancelled > 0 {
            debug!(cancelled, "cancelled pending timeouts");
        }
        cancelled
    }

    /// Number of callbacks still waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_and_untracks_itself() {
        let registry = TimeoutRegistry::new();
        let fired = counter();
        let seen = Arc::clone(&fired);
        registry.schedule(Duration::from_millis(500), move || async move {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_without_pending_is_a_no_op() {
        let registry = TimeoutRegistry::new();
        assert_eq!(registry.cancel_all(), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_handle_never_fires() {
        let registry = TimeoutRegistry::new();
        let fired = counter();
        let seen = Arc::clone(&fired);
        let handle = registry.schedule(Duration::from_secs(1), move || async move {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.cancel(handle));
        assert!(!registry.cancel(handle));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_a_chain_mid_countdown() {
        let registry = TimeoutRegistry::new();
        let fired = counter();

        let chain_registry = registry.clone();
        let first = Arc::clone(&fired);
        registry.schedule(Duration::from_secs(1), move || async move {
            first.fetch_add(1, Ordering::SeqCst);
            let second_registry = chain_registry.clone();
            let second = Arc::clone(&first);
            // results display, scheduled only once the question timer fired
            chain_registry.schedule(Duration::from_secs(2), move || async move {
                second.fetch_add(1, Ordering::SeqCst);
                let third = Arc::clone(&second);
                second_registry.schedule(Duration::from_secs(2), move || async move {
                    third.fetch_add(1, Ordering::SeqCst);
                });
            });
        });
        let unrelated = Arc::clone(&fired);
        registry.schedule(Duration::from_secs(4), move || async move {
            unrelated.fetch_add(100, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 2);

        assert_eq!(registry.cancel_all(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_cancelled_before_next_link_is_scheduled_stays_dead() {
        let registry = TimeoutRegistry::new();
        let fired = counter();

        let chain_registry = registry.clone();
        let first = Arc::clone(&fired);
        let epoch = registry.epoch();
        registry.schedule(Duration::from_secs(1), move || async move {
            first.fetch_add(1, Ordering::SeqCst);
            // still busy with the question results when the session is reset
            tokio::time::sleep(Duration::from_secs(1)).await;
            let second = Arc::clone(&first);
            let next = chain_registry.schedule_in_epoch(epoch, Duration::from_secs(1), move || async move {
                second.fetch_add(1, Ordering::SeqCst);
            });
            assert!(next.is_none());
        });

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);

        registry.cancel_all();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn current_epoch_is_accepted_and_a_stale_one_refused() {
        let registry = TimeoutRegistry::new();
        let fired = counter();
        let epoch = registry.epoch();

        let seen = Arc::clone(&fired);
        let accepted = registry.schedule_in_epoch(epoch, Duration::from_secs(1), move || async move {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(accepted.is_some());

        registry.cancel_all();
        let seen = Arc::clone(&fired);
        let refused = registry.schedule_in_epoch(epoch, Duration::from_secs(1), move || async move {
            seen.fetch_add(10, Ordering::SeqCst);
        });
        assert!(refused.is_none());
        assert_eq!(registry.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Cooperative stop signal shared between the async network domain and
/// the blocking playback workers.
///
/// Async tasks observe cancellation through [`SignalOfStop::select`] and
/// [`SignalOfStop::spawn`]; dedicated threads block on
/// [`SignalOfStop::wait_cancellation`] or poll [`SignalOfStop::cancelled`]
/// between units of work. Once cancelled, a signal stays cancelled.
#[derive(Debug)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
    token: CancellationToken,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Create a signal that is cancelled when `self` is cancelled, but can
    /// also be cancelled on its own without affecting the parent.
    pub fn child(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(self.cancelled()),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
                token: self.shared.token.child_token(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::Relaxed);
        self.shared.token.cancel();

        // Lock briefly to synchronize with threads parked on the condvar
        let _guard = self.shared.mutex.lock().unwrap();
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Relaxed) || self.shared.token.is_cancelled()
    }

    /// Block the calling thread until the signal is cancelled.
    ///
    /// Cancellation of a parent signal is only observable through the
    /// token, so the wait re-checks in short slices instead of parking
    /// indefinitely on the condvar.
    pub fn wait_cancellation(&self) {
        let mut guard = self.shared.mutex.lock().unwrap();

        while !self.cancelled() {
            let (g, _) = self
                .shared
                .condvar
                .wait_timeout(guard, Duration::from_millis(20))
                .unwrap();
            guard = g;
        }
    }

    /// Block for at most `timeout`; returns true when the signal fired.
    ///
    /// A child signal cancelled through its parent is only observable via
    /// the token here, so the wait polls in short slices rather than
    /// parking for the full timeout.
    pub fn wait_cancellation_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.shared.mutex.lock().unwrap();

        while !self.cancelled() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(20));
            let (g, _) = self.shared.condvar.wait_timeout(guard, slice).unwrap();
            guard = g;
        }
        true
    }

    /// Run a future until it completes or the signal is cancelled.
    /// Returns `None` when cancellation won the race.
    pub async fn select<F: Future>(&self, fut: F) -> Option<F::Output> {
        let token = self.shared.token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Spawn a task that is dropped as soon as the signal is cancelled.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.shared.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        })
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_is_visible_across_clones() {
        let sos = SignalOfStop::new();
        let clone = sos.clone();

        assert!(!clone.cancelled());
        sos.cancel();
        assert!(clone.cancelled());
    }

    #[test]
    fn wait_cancellation_wakes_parked_thread() {
        let sos = SignalOfStop::new();
        let waiter = sos.clone();

        let handle = thread::spawn(move || {
            waiter.wait_cancellation();
        });

        thread::sleep(Duration::from_millis(20));
        sos.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_without_cancel() {
        let sos = SignalOfStop::new();
        assert!(!sos.wait_cancellation_timeout(Duration::from_millis(20)));

        sos.cancel();
        assert!(sos.wait_cancellation_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn child_sees_parent_cancellation() {
        let parent = SignalOfStop::new();
        let child = parent.child();

        assert!(!child.cancelled());
        parent.cancel();
        assert!(child.cancelled());
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = SignalOfStop::new();
        let child = parent.child();

        child.cancel();
        assert!(child.cancelled());
        assert!(!parent.cancelled());
    }

    #[tokio::test]
    async fn select_returns_none_when_cancelled() {
        let sos = SignalOfStop::new();
        sos.cancel();

        let out = sos.select(std::future::pending::<()>()).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn select_returns_value_when_not_cancelled() {
        let sos = SignalOfStop::new();
        let out = sos.select(async { 7 }).await;
        assert_eq!(out, Some(7));
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of TCP/TLS sessions currently open.
///
/// Only used for log output. One instance is shared (behind an `Arc`) by all
/// listeners of a capture instance; independent instances never interfere.
#[derive(Debug, Default)]
pub struct SessionCounter {
    count: AtomicUsize,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new session; the session is uncounted when the guard drops.
    pub fn enter(&self) -> SessionGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        SessionGuard { counter: self }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn leave(&self) {
        // saturates at zero
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Keeps one session counted for as long as it lives.
#[must_use = "dropping the guard immediately ends the session"]
#[derive(Debug)]
pub struct SessionGuard<'a> {
    counter: &'a SessionCounter,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.counter.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch};

    #[test]
    fn guard_pairs_increment_and_decrement() {
        let counter = SessionCounter::new();
        let a = counter.enter();
        let b = counter.enter();
        assert_eq!(counter.current(), 2);
        drop(a);
        assert_eq!(counter.current(), 1);
        drop(b);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn never_goes_below_zero() {
        let counter = SessionCounter::new();
        counter.leave();
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn instances_are_independent() {
        let first = SessionCounter::new();
        let second = SessionCounter::new();
        let _guard = first.enter();
        assert_eq!(first.current(), 1);
        assert_eq!(second.current(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_balance_out() {
        let counter = Arc::new(SessionCounter::new());
        let started = 200usize;
        let finished = 150usize;

        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel::<()>();
        let (release_tx, release_rx) = watch::channel(false);

        let mut short_lived = Vec::new();
        let mut long_lived = Vec::new();
        for i in 0..started {
            let counter = Arc::clone(&counter);
            let entered_tx = entered_tx.clone();
            let mut release_rx = release_rx.clone();
            let handle = tokio::spawn(async move {
                let _guard = counter.enter();
                tokio::task::yield_now().await;
                if i >= finished {
                    entered_tx.send(()).unwrap();
                    release_rx.wait_for(|released| *released).await.unwrap();
                }
            });
            if i >= finished {
                long_lived.push(handle);
            } else {
                short_lived.push(handle);
            }
        }

        for handle in short_lived {
            handle.await.unwrap();
        }
        for _ in finished..started {
            entered_rx.recv().await.unwrap();
        }
        assert_eq!(counter.current(), started - finished);

        release_tx.send(true).unwrap();
        for handle in long_lived {
            handle.await.unwrap();
        }
        assert_eq!(counter.current(), 0);
    }
}

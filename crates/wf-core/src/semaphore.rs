//! Concurrency primitive (§4.6): a counting semaphore with a FIFO waiter
//! queue, used to bound concurrent node dispatch within a wave and
//! concurrent branches/iterations inside control-flow handlers.
//!
//! `tokio::sync::Semaphore` already hands permits to waiters in the order
//! they queued (`acquire` is a FIFO future queue internally), which is
//! exactly the fairness guarantee §9's design note asks for — this module
//! is a thin named wrapper rather than a hand-rolled queue, grounded on the
//! teacher's own use of `tokio::sync` primitives throughout `runtime.rs`.

use std::sync::Arc;

use tokio::sync::{Semaphore as TokioSemaphore, SemaphorePermit};

/// A bounded, FIFO-fair concurrency gate.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<TokioSemaphore>,
}

impl ConcurrencyGate {
    /// `capacity` must be at least 1; a workflow author or default config
    /// requesting 0 is coerced up, since a gate admitting nothing would
    /// deadlock every caller.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(TokioSemaphore::new(capacity.max(1))),
        }
    }

    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.inner
            .acquire()
            .await
            .expect("semaphore is never closed during normal operation")
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn capacity_one_serializes_access() {
        let gate = ConcurrencyGate::new(1);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_capacity_is_coerced_to_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.available_permits(), 1);
    }
}

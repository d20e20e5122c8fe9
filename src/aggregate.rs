//! Coalesced recomputation of derived values.
//!
//! An [`AggregateRecomputer`] caches one derived value (such as the total
//! number of archived messages) and refreshes it on a background worker.
//! Writers only signal that the value may be stale; they never wait for it.
//!
//! The pending signal is a channel with a single slot. Signals that arrive
//! while the slot is full are dropped, so any burst of invalidations during a
//! computation collapses into one trailing recomputation.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::StoreError;
use crate::observability::metrics::record_aggregate_recompute;

type Compute<T> = Arc<dyn Fn() -> Result<T, StoreError> + Send + Sync>;

/// Cached derived value with an explicit "may be stale" signal.
///
/// Readers see the last value a computation committed; they never touch the
/// store. `None` means no computation has finished yet.
pub struct AggregateRecomputer<T> {
    name: &'static str,
    signal: mpsc::Sender<()>,
    value: watch::Receiver<Option<T>>,
}

impl<T> AggregateRecomputer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn the worker for an aggregate computed by blocking `compute`.
    ///
    /// Must be called from within a tokio runtime. The worker stops when the
    /// recomputer is dropped.
    pub fn spawn<F>(name: &'static str, compute: F) -> Self
    where
        F: Fn() -> Result<T, StoreError> + Send + Sync + 'static,
    {
        let (signal, pending) = mpsc::channel(1);
        let (publish, value) = watch::channel(None);

        tokio::spawn(run_worker(name, Arc::new(compute), pending, publish));

        Self {
            name,
            signal,
            value,
        }
    }

    /// Signal that the cached value may be stale.
    ///
    /// Returns immediately. If a recomputation is already pending this signal
    /// is absorbed by it.
    pub fn recompute(&self) {
        match self.signal.try_send(()) {
            Ok(()) => tracing::trace!(aggregate = self.name, "Recompute scheduled"),
            Err(mpsc::error::TrySendError::Full(())) => {
                tracing::trace!(aggregate = self.name, "Recompute coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                tracing::warn!(aggregate = self.name, "Recompute worker has stopped");
            }
        }
    }

    /// The last committed value.
    pub fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Watch committed values as they change.
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.value.clone()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

async fn run_worker<T>(
    name: &'static str,
    compute: Compute<T>,
    mut pending: mpsc::Receiver<()>,
    publish: watch::Sender<Option<T>>,
) where
    T: Clone + Send + Sync + 'static,
{
    while pending.recv().await.is_some() {
        let compute = Arc::clone(&compute);
        let result = tokio::task::spawn_blocking(move || compute()).await;
        record_aggregate_recompute(name);

        match result {
            Ok(Ok(value)) => {
                publish.send_replace(Some(value));
            }
            Ok(Err(e)) => {
                tracing::warn!(aggregate = name, error = %e, "Aggregate recompute failed, keeping previous value");
            }
            Err(e) => {
                tracing::warn!(aggregate = name, error = %e, "Aggregate recompute panicked, keeping previous value");
            }
        }
    }

    tracing::debug!(aggregate = name, "Aggregate worker stopped");
}

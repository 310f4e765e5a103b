//! Serialized mutation queue
//!
//! Each aggregate root owns one queue. Operations run strictly one at a
//! time in submission order, each to completion (including its whole
//! fan-out) before the next starts. A worker task is spawned on first use
//! and exits when the queue is dropped.
//!
//! `cancel_pending` resolves operations that have not started yet as
//! `Cancelled`; the running operation is left alone.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use strata_store::{OperationKind, SyncError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce(bool) -> BoxFuture<'static, ()> + Send>;

struct Envelope {
    label: String,
    kind: OperationKind,
    generation: u64,
    job: Job,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations submitted
    pub enqueued: usize,
    /// Operations that ran
    pub completed: usize,
    /// Operations resolved as cancelled before starting
    pub cancelled: usize,
    /// Whether an operation is running now
    pub running: bool,
}

#[derive(Debug, Default)]
struct Shared {
    generations: [AtomicU64; 3],
    enqueued: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
    running: AtomicBool,
}

fn slot(kind: OperationKind) -> usize {
    match kind {
        OperationKind::Retrieve => 0,
        OperationKind::Save => 1,
        OperationKind::Delete => 2,
    }
}

impl Shared {
    fn generation(&self, kind: OperationKind) -> u64 {
        self.generations[slot(kind)].load(Ordering::Acquire)
    }
}

/// Strictly ordered, one-at-a-time operation queue
pub struct MutationQueue {
    label: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("label", &self.label)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MutationQueue {
    /// Create a queue; the worker starts lazily
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sender: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.shared.enqueued.load(Ordering::Acquire),
            completed: self.shared.completed.load(Ordering::Acquire),
            cancelled: self.shared.cancelled.load(Ordering::Acquire),
            running: self.shared.running.load(Ordering::Acquire),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Envelope>> {
        let mut guard = self.sender.lock();
        if let Some(sender) = guard.as_ref().filter(|s| !s.is_closed()) {
            return Some(sender.clone());
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(worker(self.label.clone(), Arc::clone(&self.shared), rx));
        *guard = Some(tx.clone());
        Some(tx)
    }

    /// Submit an operation.
    ///
    /// Ordering is fixed when this is called, not when the returned future
    /// is first polled. Dropping the returned future does not stop the
    /// operation.
    pub fn enqueue<F, Fut>(
        &self,
        label: impl Into<String>,
        kind: OperationKind,
        work: F,
    ) -> impl Future<Output = Result<(), SyncError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let (queue, op) = (self.label.clone(), label.clone());
        let job: Job = Box::new(move |proceed| {
            Box::pin(async move {
                let result = if proceed {
                    work().await
                } else {
                    Err(SyncError::Cancelled)
                };
                match &result {
                    Err(err) if err.is_silent_for(kind) => {
                        debug!(%queue, %op, error = %err, "operation ended quietly");
                    }
                    Err(err) => warn!(%queue, %op, error = %err, "operation failed"),
                    Ok(()) => {}
                }
                let _ = tx.send(result);
            })
        });
        let envelope = Envelope {
            label,
            kind,
            generation: self.shared.generation(kind),
            job,
        };

        match self.sender() {
            Some(sender) => {
                self.shared.enqueued.fetch_add(1, Ordering::AcqRel);
                if sender.send(envelope).is_err() {
                    warn!(queue = %self.label, "queue worker gone, dropping operation");
                }
            }
            None => warn!(queue = %self.label, "no async runtime, dropping operation"),
        }

        async move { rx.await.unwrap_or(Err(SyncError::Cancelled)) }
    }

    /// Resolve every not-yet-started operation of `kind` as cancelled
    pub fn cancel_pending(&self, kind: OperationKind) {
        debug!(queue = %self.label, ?kind, "cancelling pending operations");
        self.shared.generations[slot(kind)].fetch_add(1, Ordering::AcqRel);
    }

    /// Resolve every not-yet-started operation as cancelled
    pub fn cancel_all(&self) {
        for kind in [OperationKind::Retrieve, OperationKind::Save, OperationKind::Delete] {
            self.cancel_pending(kind);
        }
    }
}

async fn worker(label: String, shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    debug!(queue = %label, "queue worker started");
    while let Some(envelope) = rx.recv().await {
        let proceed = shared.generation(envelope.kind) == envelope.generation;
        if proceed {
            debug!(queue = %label, op = %envelope.label, "operation starting");
        } else {
            info!(queue = %label, op = %envelope.label, "operation cancelled before start");
        }

        shared.running.store(proceed, Ordering::Release);
        (envelope.job)(proceed).await;
        shared.running.store(false, Ordering::Release);

        if proceed {
            shared.completed.fetch_add(1, Ordering::AcqRel);
        } else {
            shared.cancelled.fetch_add(1, Ordering::AcqRel);
        }
    }
    debug!(queue = %label, "queue worker stopped");
}

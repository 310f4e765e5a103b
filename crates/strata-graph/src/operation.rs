//! Operation context
//!
//! A fresh context is allocated for every composite call. It holds the
//! outstanding-child counter, the outstanding-ready counter and the
//! first-error slot. Counters are atomics with checked decrements, so each
//! reaches zero exactly once and never goes negative.

use crate::node::ReadyHook;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_store::{EntityId, SyncError};
use tracing::{debug, error, warn};

/// Shared state of one fan-out
pub struct OperationContext {
    label: String,
    outstanding: AtomicUsize,
    outstanding_ready: AtomicUsize,
    first_error: Mutex<Option<SyncError>>,
    ready: Option<ReadyHook>,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("label", &self.label)
            .field("outstanding", &self.outstanding())
            .field("outstanding_ready", &self.outstanding_ready.load(Ordering::Acquire))
            .field("first_error", &*self.first_error.lock())
            .finish()
    }
}

/// Decrement unless already zero; returns the new value
fn checked_decrement(counter: &AtomicUsize) -> Option<usize> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .ok()
        .map(|previous| previous - 1)
}

impl OperationContext {
    /// Create a context; `ready` fires when every registered child is ready
    pub fn new(label: impl Into<String>, ready: Option<ReadyHook>) -> Self {
        Self {
            label: label.into(),
            outstanding: AtomicUsize::new(0),
            outstanding_ready: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            ready,
        }
    }

    /// Label used in logs
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Children still running
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Count a child before it starts
    pub fn register_child(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.outstanding_ready.fetch_add(1, Ordering::AcqRel);
    }

    /// A child reported ready; fires the context's ready hook on the last one
    pub fn child_ready(&self) {
        match checked_decrement(&self.outstanding_ready) {
            Some(0) => {
                debug!(label = %self.label, "all children ready");
                if let Some(ready) = &self.ready {
                    ready.fire();
                }
            }
            Some(_) => {}
            None => error!(label = %self.label, "ready counter underflow"),
        }
    }

    /// Remember an error if it is the first one; later ones are only logged
    pub fn record_error(&self, err: SyncError) -> bool {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(err);
            true
        } else {
            warn!(label = %self.label, error = %err, "additional child failure");
            false
        }
    }

    /// A child finished. Returns true exactly once, for the last child.
    pub fn child_completed(
        &self,
        child_type: &str,
        child_id: &EntityId,
        result: Result<(), SyncError>,
    ) -> bool {
        if let Err(err) = result {
            if err.is_cancelled() {
                debug!(label = %self.label, child_type, %child_id, "child cancelled");
            } else if matches!(err, SyncError::PermanentValidation(_)) {
                error!(label = %self.label, child_type, %child_id, error = %err, "child rejected");
            } else {
                warn!(label = %self.label, child_type, %child_id, error = %err, "child failed");
            }
            self.record_error(err);
        }
        match checked_decrement(&self.outstanding) {
            Some(0) => true,
            Some(_) => false,
            None => {
                error!(label = %self.label, "outstanding counter underflow");
                false
            }
        }
    }

    /// First error seen, if any
    #[must_use]
    pub fn first_error(&self) -> Option<SyncError> {
        self.first_error.lock().clone()
    }

    /// Aggregated result
    pub fn result(&self) -> Result<(), SyncError> {
        match self.first_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

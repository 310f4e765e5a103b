//! Best-effort cancellation gate
//!
//! A gate hands out tickets stamped with the current generation. `cancel`
//! bumps the generation, so every ticket issued before the call observes
//! cancellation while operations started afterwards run normally.

use crate::error::SyncError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Generation-counting cancellation gate
#[derive(Debug, Default)]
pub struct CancelGate {
    generation: AtomicU64,
    notify: Notify,
}

/// Snapshot of a gate's generation taken when an operation starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelTicket(u64);

impl CancelGate {
    /// Create an open gate
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket for an operation starting now
    #[inline]
    #[must_use]
    pub fn ticket(&self) -> CancelTicket {
        CancelTicket(self.generation.load(Ordering::Acquire))
    }

    /// Scope for an operation starting now
    #[inline]
    #[must_use]
    pub fn scope(&self) -> CancelScope<'_> {
        CancelScope::new(self, self.ticket())
    }

    /// Cancel every outstanding ticket
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    /// Check whether a ticket has been cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self, ticket: CancelTicket) -> bool {
        self.generation.load(Ordering::Acquire) != ticket.0
    }

    /// Fail with `Cancelled` if the ticket has been cancelled
    pub fn check(&self, ticket: CancelTicket) -> Result<(), SyncError> {
        if self.is_cancelled(ticket) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once the ticket is cancelled
    pub async fn cancelled(&self, ticket: CancelTicket) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled(ticket) {
                return;
            }
            notified.await;
        }
    }

    /// Race `work` against cancellation of `ticket`
    pub async fn guard<T, E, F>(&self, ticket: CancelTicket, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<CancelledError>,
    {
        tokio::select! {
            biased;
            () = self.cancelled(ticket) => Err(E::from(CancelledError)),
            result = work => result,
        }
    }
}

/// A gate paired with the ticket of the operation holding it
#[derive(Debug, Clone, Copy)]
pub struct CancelScope<'a> {
    gate: &'a CancelGate,
    ticket: CancelTicket,
}

impl<'a> CancelScope<'a> {
    /// Pair a gate with a previously issued ticket
    #[inline]
    #[must_use]
    pub fn new(gate: &'a CancelGate, ticket: CancelTicket) -> Self {
        Self { gate, ticket }
    }

    /// Check whether the holding operation has been cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled(self.ticket)
    }

    /// Fail with `Cancelled` if the holding operation has been cancelled
    pub fn check(&self) -> Result<(), SyncError> {
        self.gate.check(self.ticket)
    }

    /// Race `work` against cancellation
    pub async fn guard<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<CancelledError>,
    {
        self.gate.guard(self.ticket, work).await
    }
}

/// Marker produced when a guarded future loses the race to cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl From<CancelledError> for SyncError {
    fn from(_: CancelledError) -> Self {
        SyncError::Cancelled
    }
}

impl From<CancelledError> for crate::error::StoreError {
    fn from(_: CancelledError) -> Self {
        crate::error::StoreError::Cancelled
    }
}

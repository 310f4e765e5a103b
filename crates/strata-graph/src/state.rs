//! Retrieval state machine
//!
//! `NotAvailable -> PendingRetrieval -> Retrieving -> Synced`. A failed
//! retrieval drops back to `NotAvailable` so the node can be marked pending
//! again; a forced re-retrieve restarts a synced node at `Retrieving`.

use strata_store::SyncError;
use tokio::sync::watch;
use tracing::debug;

/// Where a node is in its retrieval lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrieveState {
    /// Not resident and nobody asked for it
    NotAvailable,
    /// Marked for the next content pass
    PendingRetrieval,
    /// A retrieval is under way
    Retrieving,
    /// Data and derived fields are resident
    Synced,
}

impl RetrieveState {
    /// States reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [RetrieveState] {
        use RetrieveState::{NotAvailable, PendingRetrieval, Retrieving, Synced};
        match self {
            NotAvailable => &[PendingRetrieval, Retrieving],
            PendingRetrieval => &[Retrieving],
            Retrieving => &[Synced, NotAvailable],
            Synced => &[Retrieving],
        }
    }

    /// Check a transition against the table
    pub fn validate_transition(self, to: RetrieveState) -> Result<(), SyncError> {
        if self.allowed_transitions().contains(&to) {
            Ok(())
        } else {
            Err(SyncError::PermanentValidation(format!(
                "illegal retrieve state transition {self:?} -> {to:?}"
            )))
        }
    }
}

/// Per-node retrieval state with waiters
#[derive(Debug)]
pub struct RetrieveLatch {
    state: watch::Sender<RetrieveState>,
}

impl Default for RetrieveLatch {
    fn default() -> Self {
        Self::new(RetrieveState::NotAvailable)
    }
}

impl RetrieveLatch {
    /// Create a latch in `initial`
    #[must_use]
    pub fn new(initial: RetrieveState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> RetrieveState {
        *self.state.borrow()
    }

    fn transition(&self, from: &[RetrieveState], to: RetrieveState) -> bool {
        self.state.send_if_modified(|current| {
            if from.contains(current) && current.validate_transition(to).is_ok() {
                debug!(from = ?*current, ?to, "retrieve state");
                *current = to;
                true
            } else {
                false
            }
        })
    }

    /// Mark for retrieval; only moves a `NotAvailable` node
    pub fn mark_pending(&self) -> bool {
        self.transition(&[RetrieveState::NotAvailable], RetrieveState::PendingRetrieval)
    }

    /// Claim a pending node for retrieval; false if it was not pending
    pub fn retrieve_if_pending(&self) -> bool {
        self.transition(&[RetrieveState::PendingRetrieval], RetrieveState::Retrieving)
    }

    /// Enter `Retrieving` for a direct retrieval.
    ///
    /// A synced node only restarts when `forced`; a node already retrieving
    /// stays put.
    pub fn begin(&self, forced: bool) {
        let from: &[RetrieveState] = if forced {
            &[
                RetrieveState::NotAvailable,
                RetrieveState::PendingRetrieval,
                RetrieveState::Synced,
            ]
        } else {
            &[RetrieveState::NotAvailable, RetrieveState::PendingRetrieval]
        };
        self.transition(from, RetrieveState::Retrieving);
    }

    /// Settle a retrieval started with `begin` or `retrieve_if_pending`
    pub fn finish(&self, succeeded: bool) {
        let to = if succeeded {
            RetrieveState::Synced
        } else {
            RetrieveState::NotAvailable
        };
        self.transition(&[RetrieveState::Retrieving], to);
    }

    /// Force a state; used when a node is created already resident
    pub fn set(&self, state: RetrieveState) {
        self.state.send_replace(state);
    }

    /// Wait until no retrieval is running, returning the state it left.
    ///
    /// A pending node does not block; only `Retrieving` is waited out.
    pub async fn wait_settled(&self) -> RetrieveState {
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|s| *s != RetrieveState::Retrieving).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        settled
    }
}

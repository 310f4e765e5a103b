//! Strata Store - tiered persistence adapters
//!
//! The lower half of the sync engine:
//! - Error taxonomy shared by every operation (`SyncError`, `StoreError`)
//! - Bounded retry with HTTP / transport failure classification
//! - Scheduler seam for deferring retries on a priority class
//! - Generation-based cancellation gates for in-flight remote verbs
//! - `TieredStore`, which applies retry, existence probes and copy-down on
//!   top of pluggable local and remote backends
//! - In-memory and filesystem backends
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_store::prelude::*;
//!
//! let store = TieredStore::<Venue>::new(
//!     Arc::new(FsLocalStore::new("/var/lib/strata")),
//!     Arc::new(MemoryRemoteStore::new()),
//!     StorePolicy::record(),
//!     Arc::new(TokioScheduler),
//! );
//! let gate = CancelGate::new();
//! let venue = store.retrieve_remote(&id, Some(LocalTier::Cache), gate.scope()).await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod adapter;
pub mod cancel;
pub mod error;
pub mod fs;
pub mod ids;
pub mod memory;
pub mod retry;
pub mod scheduler;
pub mod tier;

// Re-exports for convenience
pub use adapter::{
    DeleteOutcome, LocalCopy, LocalStore, Record, RemoteStore, SaveOutcome, StorePolicy,
    TieredStore,
};
pub use cancel::{CancelGate, CancelScope, CancelTicket, CancelledError};
pub use error::{OperationKind, StoreError, SyncError};
pub use fs::FsLocalStore;
pub use ids::EntityId;
pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use retry::{Retry, RetryPolicy, TransportErrorKind};
pub use scheduler::{Priority, Scheduler, TokioScheduler};
pub use tier::{Existence, LocalTier, Scope, Tier, TierSet};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Strata Store
    pub use crate::{
        CancelGate, EntityId, Existence, FsLocalStore, LocalStore, LocalTier, MemoryLocalStore,
        MemoryRemoteStore, Priority, Record, RemoteStore, RetryPolicy, Scope, StorePolicy,
        SyncError, TieredStore, Tier, TierSet, TokioScheduler,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

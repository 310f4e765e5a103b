//! Strata Graph - recursive entity graph synchronization
//!
//! The upper half of the sync engine:
//! - `EntityNode`: the capability contract every entity implements
//! - `TieredObject`: a payload bound to its tiered store
//! - Orchestrator: recursive retrieve / save / delete with fan-out and
//!   first-error aggregation through an `OperationContext`
//! - `MutationQueue`: one-at-a-time ordering per aggregate root
//! - Content streaming: single-flight, coalescing moment retrieval
//! - Entities: story, moment, media, markup, venue, user
//! - `Session` for drafts and `Prefetcher` for warming stories
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_graph::prelude::*;
//!
//! let context = SyncContext::in_memory(SyncConfig::default());
//! let session = Session::new(Arc::clone(&context));
//! let story = session.start_draft("Sunday brunch");
//! story.add_moment(moment)?;
//! session.pre_save(Some(moment_node)).await?;
//! session.publish().await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod content;
pub mod context;
pub mod entities;
pub mod node;
pub mod object;
pub mod operation;
pub mod orchestrator;
pub mod prefetch;
pub mod queue;
pub mod session;
pub mod state;

// Re-exports for convenience
pub use config::{ConfigError, SyncConfig};
pub use content::{request_content, ContentCallback, ContentSource, ContentStream};
pub use context::{Backends, DiskBackends, MemoryBackends, Stores, SyncContext};
pub use entities::{
    Markup, MarkupRecord, Media, MediaKind, MediaRecord, Moment, MomentRecord, Story, StoryRecord,
    User, UserRecord, Venue, VenueRecord,
};
pub use node::{ChildLink, EntityNode, NodeRef, Purpose, ReadyHook, StoredObject};
pub use object::TieredObject;
pub use operation::OperationContext;
pub use orchestrator::FanOut;
pub use prefetch::{Band, PrefetchHandle, PrefetchKind, PrefetchOutcome, Prefetcher};
pub use queue::{MutationQueue, QueueStats};
pub use session::Session;
pub use state::{RetrieveLatch, RetrieveState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Strata Graph
    pub use crate::{
        EntityNode, Markup, Media, MediaKind, Moment, NodeRef, Prefetcher, Session, Story,
        SyncConfig, SyncContext, User, Venue,
    };
    pub use std::sync::Arc;
    pub use strata_store::{EntityId, LocalTier, Scope, SyncError};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

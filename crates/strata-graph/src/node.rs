//! Entity node abstraction
//!
//! Every persistable entity implements `EntityNode`. An entity supplies its
//! identity, the `StoredObject` holding its payload, and which children a
//! given operation should reach; the recursive retrieve / save / delete
//! algorithms are provided by the trait and run through the orchestrator.
//! Aggregate roots override the recursive methods to route them through
//! their mutation queue.

use crate::orchestrator;
use crate::state::{RetrieveLatch, RetrieveState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use strata_store::{CancelGate, EntityId, LocalTier, Scope, SyncError, TierSet};

/// Shared handle to any entity
pub type NodeRef = Arc<dyn EntityNode>;

/// Which composite operation is enumerating children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Full recursive retrieve
    Retrieve,
    /// Full recursive save
    Save,
    /// Full recursive delete
    Delete,
    /// Summary retrieve / save of an aggregate root
    Digest,
}

/// A child reached by a composite operation
#[derive(Clone)]
pub struct ChildLink {
    /// The child
    pub node: NodeRef,
    /// Scope override; `None` inherits the parent's scope
    pub scope: Option<Scope>,
}

impl ChildLink {
    /// Child operated on with the parent's scope
    #[inline]
    #[must_use]
    pub fn owned(node: NodeRef) -> Self {
        Self { node, scope: None }
    }

    /// Shared reference that must never leave the device through this parent
    #[inline]
    #[must_use]
    pub fn local_only(node: NodeRef) -> Self {
        Self {
            node,
            scope: Some(Scope::LocalOnly),
        }
    }
}

impl fmt::Debug for ChildLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildLink")
            .field("type", &self.node.type_name())
            .field("id", &self.node.unique_identifier())
            .field("scope", &self.scope)
            .finish()
    }
}

/// One-shot "usable enough" signal, separate from completion.
///
/// Firing is idempotent; only the first call runs the callback.
#[derive(Clone)]
pub struct ReadyHook(Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>);

impl ReadyHook {
    /// Wrap a callback
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(callback)))))
    }

    /// Run the callback if it has not run yet; returns whether it ran now
    pub fn fire(&self) -> bool {
        let callback = self.0.lock().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Whether the callback has already run
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl fmt::Debug for ReadyHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyHook")
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// Single-node persistence verbs, implemented by `TieredObject`
#[async_trait]
pub trait StoredObject: Send + Sync {
    /// Identifier
    fn id(&self) -> &EntityId;

    /// Tiers the payload is known to exist in
    fn tiers(&self) -> TierSet;

    /// Whether the payload is in memory
    fn is_resident(&self) -> bool;

    /// Retrieval state
    fn latch(&self) -> &RetrieveLatch;

    /// Gate cancelled by `cancel_retrieve`
    fn retrieve_gate(&self) -> &CancelGate;

    /// Gate cancelled by `cancel_save`
    fn save_gate(&self) -> &CancelGate;

    /// Memory, then the local tier
    async fn retrieve(&self, tier: LocalTier, forced: bool) -> Result<(), SyncError>;

    /// Memory, then the local tier, then the remote with write-back to the local tier
    async fn retrieve_from_local_then_remote(
        &self,
        tier: LocalTier,
        forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError>;

    /// Write to the local tier
    async fn save(&self, tier: LocalTier) -> Result<(), SyncError>;

    /// Write to the local tier, then to the remote
    async fn save_to_local_and_remote(&self, tier: LocalTier) -> Result<(), SyncError>;

    /// Remove from the local tier
    async fn delete(&self, tier: LocalTier) -> Result<(), SyncError>;

    /// Remove from the remote and both local tiers
    async fn delete_from_local_and_remote(&self) -> Result<(), SyncError>;
}

/// Capability contract of every persistable entity
#[async_trait]
pub trait EntityNode: Send + Sync + 'static {
    /// Human readable type name
    fn type_name(&self) -> &'static str;

    /// The node's own payload and persistence verbs
    fn object(&self) -> &dyn StoredObject;

    /// Process-stable identifier
    fn unique_identifier(&self) -> EntityId {
        self.object().id().clone()
    }

    /// Retrieval state
    fn retrieve_state(&self) -> RetrieveState {
        self.object().latch().state()
    }

    /// Whether the node's own payload is in memory
    fn is_retrieved(&self) -> bool {
        self.object().is_resident()
    }

    /// Composite nodes signal ready through their children, not themselves
    fn is_composite(&self) -> bool {
        false
    }

    /// Materialize child nodes from references in the payload.
    ///
    /// Called after the node's own payload is resident and before children
    /// are enumerated.
    fn resolve_children(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Children an operation should reach
    fn children(&self, _purpose: Purpose, _tier: LocalTier) -> Vec<ChildLink> {
        Vec::new()
    }

    /// Retrieve from memory or the local tier
    async fn retrieve(&self, tier: LocalTier, forced: bool) -> Result<(), SyncError> {
        self.object().retrieve(tier, forced).await
    }

    /// Retrieve with remote fallback
    async fn retrieve_from_local_then_remote(
        &self,
        tier: LocalTier,
        forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError> {
        self.object()
            .retrieve_from_local_then_remote(tier, forced, ready)
            .await
    }

    /// Save to the local tier
    async fn save(&self, tier: LocalTier) -> Result<(), SyncError> {
        self.object().save(tier).await
    }

    /// Save to the local tier and the remote
    async fn save_to_local_and_remote(&self, tier: LocalTier) -> Result<(), SyncError> {
        self.object().save_to_local_and_remote(tier).await
    }

    /// Delete from the local tier
    async fn delete(&self, tier: LocalTier) -> Result<(), SyncError> {
        self.object().delete(tier).await
    }

    /// Delete everywhere
    async fn delete_from_local_and_remote(&self) -> Result<(), SyncError> {
        self.object().delete_from_local_and_remote().await
    }

    /// Stop starting new retrieval work here and below
    fn cancel_retrieve(&self) {
        self.object().retrieve_gate().cancel();
        for link in self.children(Purpose::Retrieve, LocalTier::Cache) {
            link.node.cancel_retrieve();
        }
    }

    /// Stop starting new save work here and below
    fn cancel_save(&self) {
        self.object().save_gate().cancel();
        for link in self.children(Purpose::Save, LocalTier::Cache) {
            link.node.cancel_save();
        }
    }

    /// Retrieve self, then every child
    async fn retrieve_recursive(
        &self,
        scope: Scope,
        tier: LocalTier,
        forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError> {
        orchestrator::retrieve_tree(self, Purpose::Retrieve, scope, tier, forced, ready).await
    }

    /// Save every child, then self
    async fn save_recursive(&self, scope: Scope, tier: LocalTier) -> Result<(), SyncError> {
        orchestrator::save_tree(self, Purpose::Save, scope, tier).await
    }

    /// Delete self, then every child
    async fn delete_recursive(&self, scope: Scope, tier: LocalTier) -> Result<(), SyncError> {
        orchestrator::delete_tree(self, scope, tier).await
    }
}

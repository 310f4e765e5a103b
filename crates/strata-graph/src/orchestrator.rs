//! Graph orchestrator
//!
//! Turns "operate on a node" into "operate on the node and wait for every
//! child":
//! - retrieve: self, then children concurrently
//! - save: children concurrently, then self only if every child succeeded
//! - delete: self, then children concurrently, best effort
//!
//! Children run as futures polled by the caller's task, so their completion
//! bookkeeping is serialized through one `OperationContext` per call. The
//! first error wins; siblings are never stopped early, and side effects of
//! children that succeeded are not rolled back when the composite fails.

use crate::node::{EntityNode, NodeRef, Purpose, ReadyHook};
use crate::operation::OperationContext;
use crate::state::RetrieveLatch;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use strata_store::{LocalTier, Scope, SyncError};
use tracing::{debug, info, warn};

/// Retrieve a single node with the variant matching `scope`; no fan-out
pub async fn retrieve_object<N: EntityNode + ?Sized>(
    node: &N,
    scope: Scope,
    tier: LocalTier,
    forced: bool,
    ready: Option<ReadyHook>,
) -> Result<(), SyncError> {
    match scope {
        Scope::LocalOnly => {
            node.retrieve(tier, forced).await?;
            if let Some(ready) = ready {
                ready.fire();
            }
            Ok(())
        }
        Scope::LocalThenRemote => node.retrieve_from_local_then_remote(tier, forced, ready).await,
    }
}

/// Save a single node with the variant matching `scope`; no fan-out
pub async fn save_object<N: EntityNode + ?Sized>(
    node: &N,
    scope: Scope,
    tier: LocalTier,
) -> Result<(), SyncError> {
    match scope {
        Scope::LocalOnly => node.save(tier).await,
        Scope::LocalThenRemote => node.save_to_local_and_remote(tier).await,
    }
}

/// Delete a single node with the variant matching `scope`; no fan-out
pub async fn delete_object<N: EntityNode + ?Sized>(
    node: &N,
    scope: Scope,
    tier: LocalTier,
) -> Result<(), SyncError> {
    match scope {
        Scope::LocalOnly => node.delete(tier).await,
        Scope::LocalThenRemote => node.delete_from_local_and_remote().await,
    }
}

/// Concurrent child operations sharing one `OperationContext`
pub struct FanOut {
    context: Arc<OperationContext>,
    children: FuturesUnordered<BoxFuture<'static, ()>>,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("context", &self.context)
            .field("children", &self.children.len())
            .finish()
    }
}

impl FanOut {
    /// Start an empty fan-out
    pub fn new(label: impl Into<String>, ready: Option<ReadyHook>) -> Self {
        Self {
            context: Arc::new(OperationContext::new(label, ready)),
            children: FuturesUnordered::new(),
        }
    }

    /// Number of children registered
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether no child has been registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Shared context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<OperationContext> {
        &self.context
    }

    fn push<F>(&mut self, child: NodeRef, run: F)
    where
        F: FnOnce(NodeRef) -> BoxFuture<'static, Result<(), SyncError>>,
    {
        self.context.register_child();
        let context = Arc::clone(&self.context);
        let child_type = child.type_name();
        let child_id = child.unique_identifier();
        let work = run(child);
        self.children.push(Box::pin(async move {
            let result = work.await;
            if context.child_completed(child_type, &child_id, result) {
                debug!(label = %context.label(), "all children completed");
            }
        }));
    }

    /// Recursively retrieve a child
    pub fn retrieve_child(&mut self, child: NodeRef, scope: Scope, tier: LocalTier, forced: bool) {
        let context = Arc::clone(&self.context);
        let ready = ReadyHook::new(move || context.child_ready());
        self.push(child, move |child| {
            Box::pin(async move {
                child
                    .retrieve_recursive(scope, tier, forced, Some(ready))
                    .await
            })
        });
    }

    /// Recursively save a child
    pub fn save_child(&mut self, child: NodeRef, scope: Scope, tier: LocalTier) {
        self.push(child, move |child| {
            Box::pin(async move { child.save_recursive(scope, tier).await })
        });
    }

    /// Recursively delete a child
    pub fn delete_child(&mut self, child: NodeRef, scope: Scope, tier: LocalTier) {
        self.push(child, move |child| {
            Box::pin(async move { child.delete_recursive(scope, tier).await })
        });
    }

    /// Wait for every child and return the first error seen
    pub async fn join(mut self) -> Result<(), SyncError> {
        if self.children.is_empty() {
            return Ok(());
        }
        while self.children.next().await.is_some() {}
        self.context.result()
    }
}

/// Save the root once every child save has reported.
///
/// A child failure short-circuits: the root is not saved and the first
/// child error is returned.
pub async fn saves_completed_from_all_children<N: EntityNode + ?Sized>(
    root: &N,
    children_outcome: Result<(), SyncError>,
    scope: Scope,
    tier: LocalTier,
) -> Result<(), SyncError> {
    if let Err(err) = children_outcome {
        warn!(
            node = root.type_name(),
            id = %root.unique_identifier(),
            error = %err,
            "child save failed, not saving parent"
        );
        return Err(err);
    }
    save_object(root, scope, tier).await
}

fn label<N: EntityNode + ?Sized>(verb: &str, node: &N) -> String {
    format!("{verb} {} {}", node.type_name(), node.unique_identifier())
}

/// Retrieve a node, then every child `purpose` enumerates.
///
/// Only a full retrieve drives the node's retrieval state.
pub async fn retrieve_tree<N: EntityNode + ?Sized>(
    node: &N,
    purpose: Purpose,
    scope: Scope,
    tier: LocalTier,
    forced: bool,
    ready: Option<ReadyHook>,
) -> Result<(), SyncError> {
    let mut settle = (purpose == Purpose::Retrieve).then(|| Settle::begin(node.object().latch(), forced));
    let result = retrieve_tree_inner(node, purpose, scope, tier, forced, ready).await;
    if let Some(settle) = settle.take() {
        settle.finish(result.is_ok());
    }
    result
}

/// Settles a latch when the retrieval ends, including when its future is
/// dropped part way.
struct Settle<'a> {
    latch: &'a RetrieveLatch,
    armed: bool,
}

impl<'a> Settle<'a> {
    fn begin(latch: &'a RetrieveLatch, forced: bool) -> Self {
        latch.begin(forced);
        Self { latch, armed: true }
    }

    fn finish(mut self, succeeded: bool) {
        self.armed = false;
        self.latch.finish(succeeded);
    }
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.latch.finish(false);
        }
    }
}

async fn retrieve_tree_inner<N: EntityNode + ?Sized>(
    node: &N,
    purpose: Purpose,
    scope: Scope,
    tier: LocalTier,
    forced: bool,
    ready: Option<ReadyHook>,
) -> Result<(), SyncError> {
    let gate = node.object().retrieve_gate();
    let ticket = gate.ticket();

    let own_ready = if node.is_composite() { None } else { ready.clone() };
    retrieve_object(node, scope, tier, forced, own_ready).await?;
    node.resolve_children()?;

    let children = node.children(purpose, tier);
    gate.check(ticket)?;
    if children.is_empty() {
        if let Some(ready) = ready {
            ready.fire();
        }
        return Ok(());
    }

    let mut fan = FanOut::new(label("retrieve", node), ready);
    for link in children {
        fan.retrieve_child(link.node, link.scope.unwrap_or(scope), tier, forced);
    }
    debug!(label = %fan.context().label(), children = fan.len(), "retrieving children");
    fan.join().await
}

/// Save every child `purpose` enumerates, then the node itself
pub async fn save_tree<N: EntityNode + ?Sized>(
    node: &N,
    purpose: Purpose,
    scope: Scope,
    tier: LocalTier,
) -> Result<(), SyncError> {
    let gate = node.object().save_gate();
    let ticket = gate.ticket();

    let children = node.children(purpose, tier);
    if children.is_empty() {
        return save_object(node, scope, tier).await;
    }
    gate.check(ticket)?;

    let mut fan = FanOut::new(label("save", node), None);
    for link in children {
        fan.save_child(link.node, link.scope.unwrap_or(scope), tier);
    }
    debug!(label = %fan.context().label(), children = fan.len(), "saving children");
    let outcome = fan.join().await.and_then(|()| gate.check(ticket));
    let result = saves_completed_from_all_children(node, outcome, scope, tier).await;
    if result.is_ok() {
        info!(node = node.type_name(), id = %node.unique_identifier(), ?scope, %tier, "saved recursively");
    }
    result
}

/// Delete a node, then every child, best effort.
///
/// The node is retrieved first so its children are known. A node absent
/// from every tier counts as already deleted. When deleting the node itself
/// fails, children are still deleted and the node's error is returned.
pub async fn delete_tree<N: EntityNode + ?Sized>(
    node: &N,
    scope: Scope,
    tier: LocalTier,
) -> Result<(), SyncError> {
    match retrieve_object(node, scope, tier, false, None).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            debug!(node = node.type_name(), id = %node.unique_identifier(), "nothing to delete");
            return Ok(());
        }
        Err(err) => return Err(err),
    }
    node.resolve_children()?;
    let children = node.children(Purpose::Delete, tier);

    let own = delete_object(node, scope, tier).await;
    if let Err(err) = &own {
        warn!(
            node = node.type_name(),
            id = %node.unique_identifier(),
            error = %err,
            "delete failed, still deleting children"
        );
    }

    let mut fan = FanOut::new(label("delete", node), None);
    for link in children {
        fan.delete_child(link.node, link.scope.unwrap_or(scope), tier);
    }
    let children_outcome = fan.join().await;
    own.and(children_outcome)
}

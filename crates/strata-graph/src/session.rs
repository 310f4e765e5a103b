//! Draft session
//!
//! Holds the story being composed. Edits are checkpointed to the local
//! draft tier as they happen so a draft survives restarts; publishing moves
//! the whole tree to the cache tier and the remote and clears the draft.
//! While a story is in the session its content is read from the draft tier.

use crate::context::SyncContext;
use crate::entities::Story;
use crate::node::{EntityNode, NodeRef};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_store::{EntityId, LocalTier, Scope, SyncError};
use tracing::{info, warn};

/// The story being composed or edited
#[derive(Debug)]
pub struct Session {
    context: Arc<SyncContext>,
    current: RwLock<Option<Arc<Story>>>,
    editing: AtomicBool,
}

impl Session {
    /// Session with no draft
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self {
            context,
            current: RwLock::new(None),
            editing: AtomicBool::new(false),
        }
    }

    /// Shared context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    /// Story being composed
    #[must_use]
    pub fn current_story(&self) -> Option<Arc<Story>> {
        self.current.read().clone()
    }

    /// Whether the current story was already published
    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.editing.load(Ordering::Acquire)
    }

    /// Start composing a new story, replacing any current one
    pub fn start_draft(&self, title: impl Into<String>) -> Arc<Story> {
        let story = Story::create(&self.context, title);
        story.set_content_location(Scope::LocalThenRemote, LocalTier::Draft);
        *self.current.write() = Some(Arc::clone(&story));
        self.editing.store(false, Ordering::Release);
        story
    }

    /// Edit an already-published story
    pub fn edit_story(&self, story: Arc<Story>) {
        story.set_content_location(Scope::LocalThenRemote, LocalTier::Draft);
        *self.current.write() = Some(story);
        self.editing.store(true, Ordering::Release);
    }

    /// Reload a draft left in the local draft tier.
    ///
    /// An edit of a published story only checkpoints what changed, so its
    /// untouched parts fall back to the remote.
    pub async fn resume_draft(&self, id: EntityId, editing: bool) -> Result<Arc<Story>, SyncError> {
        let story = Story::reference(&self.context, id);
        let scope = if editing {
            Scope::LocalThenRemote
        } else {
            Scope::LocalOnly
        };
        story
            .retrieve_recursive(scope, LocalTier::Draft, false, None)
            .await?;
        *self.current.write() = Some(Arc::clone(&story));
        self.editing.store(editing, Ordering::Release);
        Ok(story)
    }

    fn require_current(&self) -> Result<Arc<Story>, SyncError> {
        self.current_story()
            .ok_or_else(|| SyncError::PermanentValidation("no story in progress".into()))
    }

    /// Checkpoint an edit.
    ///
    /// Saves `object` to the local draft, then the story digest, then
    /// pushes `object` to the local draft and the remote. Without an object
    /// only the digest is saved locally.
    pub async fn pre_save(&self, object: Option<NodeRef>) -> Result<(), SyncError> {
        let story = self.require_current()?;
        let Some(object) = object else {
            return story.save_digest(Scope::LocalOnly, LocalTier::Draft).await;
        };

        object.save_recursive(Scope::LocalOnly, LocalTier::Draft).await?;
        story.save_digest(Scope::LocalOnly, LocalTier::Draft).await?;
        object
            .save_recursive(Scope::LocalThenRemote, LocalTier::Draft)
            .await
    }

    /// Throw the current draft away.
    ///
    /// A new story is also removed from the remote; an edited story keeps
    /// its published copy.
    pub async fn discard_draft(&self) -> Result<(), SyncError> {
        let story = self
            .current
            .write()
            .take()
            .ok_or_else(|| SyncError::PermanentValidation("no story in progress".into()))?;
        let editing = self.editing.swap(false, Ordering::AcqRel);

        for moment in story.moments() {
            moment.cancel_retrieve();
        }

        let local = story.delete_recursive(Scope::LocalOnly, LocalTier::Draft).await;
        if let Err(err) = &local {
            warn!(story = %story.unique_identifier(), error = %err, "draft delete failed");
        }
        if editing {
            return local;
        }
        let remote = story
            .delete_recursive(Scope::LocalThenRemote, LocalTier::Draft)
            .await;
        info!(story = %story.unique_identifier(), "draft discarded");
        local.and(remote)
    }

    /// Publish the current story.
    ///
    /// The whole tree is saved to the cache tier and the remote, the author
    /// records the story, and the draft copy is removed.
    pub async fn publish(&self) -> Result<Arc<Story>, SyncError> {
        let story = self.require_current()?;
        self.context
            .scheduler()
            .after(Duration::ZERO, self.context.config().recursive_priority)
            .await;

        story
            .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
            .await?;

        if let Some(author) = story.author() {
            author.add_authored_story(story.unique_identifier())?;
            author.save_to_local_and_remote(LocalTier::Cache).await?;
        }

        if let Err(err) = story.delete_recursive(Scope::LocalOnly, LocalTier::Draft).await {
            warn!(story = %story.unique_identifier(), error = %err, "draft cleanup failed after publish");
        }

        story.set_content_location(Scope::LocalThenRemote, LocalTier::Cache);
        *self.current.write() = None;
        self.editing.store(false, Ordering::Release);
        info!(story = %story.unique_identifier(), "published");
        Ok(story)
    }
}

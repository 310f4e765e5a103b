//! Stories
//!
//! The aggregate root. A story owns its moments, markups and thumbnail, and
//! references a venue and an author that other stories share. Every
//! composite operation on a story runs through its mutation queue, and
//! moment content is streamed in through a single-flight pass. Content
//! passes and prefetches read moments from the scope and tier the story
//! itself was last retrieved from.
//!
//! Which children an operation reaches depends on the operation and tier:
//!
//! | purpose  | thumbnail | venue      | moments | markups | author                        |
//! |----------|-----------|------------|---------|---------|-------------------------------|
//! | retrieve | yes       | yes        | yes     | yes     | cache tier only               |
//! | save     | unshared  | yes        | yes     | yes     | cache tier only               |
//! | delete   | unshared  | local only | yes     | yes     | cache tier, not current user  |
//! | digest   | no        | yes        | no      | no      | cache tier only               |
//!
//! A thumbnail is "shared" when one of the story's moments owns the same
//! file; it is then saved and deleted through that moment.

use crate::content::{self, ContentCallback, ContentSource, ContentStream};
use crate::context::SyncContext;
use crate::entities::markup::Markup;
use crate::entities::media::{Media, MediaKind};
use crate::entities::moment::Moment;
use crate::entities::user::User;
use crate::entities::venue::Venue;
use crate::node::{ChildLink, EntityNode, NodeRef, Purpose, ReadyHook, StoredObject};
use crate::object::TieredObject;
use crate::orchestrator;
use crate::queue::MutationQueue;
use crate::state::RetrieveState;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use strata_store::{EntityId, LocalTier, OperationKind, Record, Scope, SyncError};
use tracing::debug;

/// Stored story payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoryRecord {
    /// Title
    pub title: String,
    /// Moments in display order
    #[serde(default)]
    pub moment_ids: Vec<EntityId>,
    /// Story-level markups
    #[serde(default)]
    pub markup_ids: Vec<EntityId>,
    /// Cover thumbnail file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_file_name: Option<String>,
    /// Venue the story was captured at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<EntityId>,
    /// Author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<EntityId>,
    /// Link attached to the story
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_url: Option<String>,
    /// Prompt shown with the link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swipe_message: Option<String>,
    /// Search tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Record for StoryRecord {
    const KIND: &'static str = "story";
}

type ParkedReady = Box<dyn FnOnce() + Send>;

/// A story
pub struct Story {
    object: TieredObject<StoryRecord>,
    context: Arc<SyncContext>,
    this: Weak<Story>,
    queue: MutationQueue,
    content: ContentStream,
    moments: RwLock<Vec<Arc<Moment>>>,
    markups: RwLock<Vec<Arc<Markup>>>,
    thumbnail: RwLock<Option<Arc<Media>>>,
    venue: RwLock<Option<Arc<Venue>>>,
    author: RwLock<Option<Arc<User>>>,
    parked_ready: Mutex<Option<ParkedReady>>,
    location: Mutex<(Scope, LocalTier)>,
}

impl fmt::Debug for Story {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Story")
            .field("object", &self.object)
            .field("moments", &self.moments.read().len())
            .field("queue", &self.queue)
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

impl Story {
    fn build(context: &Arc<SyncContext>, object: TieredObject<StoryRecord>) -> Arc<Self> {
        let label = format!("story {}", object.id());
        Arc::new_cyclic(|this| Self {
            object,
            context: Arc::clone(context),
            this: this.clone(),
            queue: MutationQueue::new(label),
            content: ContentStream::new(),
            moments: RwLock::new(Vec::new()),
            markups: RwLock::new(Vec::new()),
            thumbnail: RwLock::new(None),
            venue: RwLock::new(None),
            author: RwLock::new(None),
            parked_ready: Mutex::new(None),
            location: Mutex::new((Scope::LocalThenRemote, LocalTier::Cache)),
        })
    }

    /// New, empty story
    pub fn create(context: &Arc<SyncContext>, title: impl Into<String>) -> Arc<Self> {
        let record = StoryRecord {
            title: title.into(),
            ..StoryRecord::default()
        };
        Self::build(
            context,
            TieredObject::new(
                EntityId::generate(),
                Arc::clone(&context.stores().stories),
                record,
            ),
        )
    }

    /// Unretrieved reference
    pub fn reference(context: &Arc<SyncContext>, id: EntityId) -> Arc<Self> {
        Self::build(
            context,
            TieredObject::reference(id, Arc::clone(&context.stores().stories)),
        )
    }

    fn strong(&self) -> Result<Arc<Self>, SyncError> {
        self.this.upgrade().ok_or_else(|| {
            SyncError::PermanentValidation(format!("story {} is being dropped", self.object.id()))
        })
    }

    /// Title, if resident
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.object.read(|r| r.title.clone())
    }

    /// Rename
    pub fn set_title(&self, title: impl Into<String>) -> Result<(), SyncError> {
        let title = title.into();
        self.object.update(|r| r.title = title)
    }

    /// Attach a link and its prompt
    pub fn set_link(&self, url: Option<String>, swipe_message: Option<String>) -> Result<(), SyncError> {
        self.object.update(|r| {
            r.story_url = url;
            r.swipe_message = swipe_message;
        })
    }

    /// Moments in display order
    #[must_use]
    pub fn moments(&self) -> Vec<Arc<Moment>> {
        self.moments.read().clone()
    }

    /// Moment at `index`
    #[must_use]
    pub fn moment(&self, index: usize) -> Option<Arc<Moment>> {
        self.moments.read().get(index).cloned()
    }

    /// Position of `moment` in this story
    #[must_use]
    pub fn index_of(&self, moment: &Moment) -> Option<usize> {
        let id = moment.unique_identifier();
        self.moments
            .read()
            .iter()
            .position(|m| m.unique_identifier() == id)
    }

    /// Append a moment
    pub fn add_moment(&self, moment: Arc<Moment>) -> Result<(), SyncError> {
        let len = self.moments.read().len();
        self.add_moment_at(len, moment)
    }

    /// Insert a moment at `index`
    pub fn add_moment_at(&self, index: usize, moment: Arc<Moment>) -> Result<(), SyncError> {
        let mut moments = self.moments.write();
        if index > moments.len() {
            return Err(SyncError::PermanentValidation(format!(
                "moment index {index} out of range for {} moments",
                moments.len()
            )));
        }
        let id = moment.unique_identifier();
        self.object.update(|r| r.moment_ids.insert(index, id))?;
        moments.insert(index, moment);
        Ok(())
    }

    /// Remove a moment by id, returning it if it was present
    pub fn remove_moment(&self, id: &EntityId) -> Result<Option<Arc<Moment>>, SyncError> {
        let mut moments = self.moments.write();
        let Some(index) = moments.iter().position(|m| &m.unique_identifier() == id) else {
            return Ok(None);
        };
        self.object.update(|r| r.moment_ids.retain(|m| m != id))?;
        Ok(Some(moments.remove(index)))
    }

    /// Story-level markups
    #[must_use]
    pub fn markups(&self) -> Vec<Arc<Markup>> {
        self.markups.read().clone()
    }

    /// Add a story-level markup
    pub fn add_markup(&self, markup: Arc<Markup>) -> Result<(), SyncError> {
        let id = markup.unique_identifier();
        self.object.update(|r| r.markup_ids.push(id))?;
        self.markups.write().push(markup);
        Ok(())
    }

    /// Cover thumbnail
    #[must_use]
    pub fn thumbnail(&self) -> Option<Arc<Media>> {
        self.thumbnail.read().clone()
    }

    /// Set the cover thumbnail
    pub fn set_thumbnail(&self, media: Arc<Media>) -> Result<(), SyncError> {
        let file_name = media.file_name().to_string();
        self.object.update(|r| r.thumbnail_file_name = Some(file_name))?;
        *self.thumbnail.write() = Some(media);
        Ok(())
    }

    /// Venue
    #[must_use]
    pub fn venue(&self) -> Option<Arc<Venue>> {
        self.venue.read().clone()
    }

    /// Set or clear the venue
    pub fn set_venue(&self, venue: Option<Arc<Venue>>) -> Result<(), SyncError> {
        let id = venue.as_ref().map(|v| v.unique_identifier());
        self.object.update(|r| r.venue_id = id)?;
        *self.venue.write() = venue;
        Ok(())
    }

    /// Author
    #[must_use]
    pub fn author(&self) -> Option<Arc<User>> {
        self.author.read().clone()
    }

    /// Set or clear the author
    pub fn set_author(&self, author: Option<Arc<User>>) -> Result<(), SyncError> {
        let id = author.as_ref().map(|a| a.unique_identifier());
        self.object.update(|r| r.author_id = id)?;
        *self.author.write() = author;
        Ok(())
    }

    /// Mutation queue
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    fn detached_thumbnail(&self) -> Option<Arc<Media>> {
        let thumbnail = self.thumbnail()?;
        let shared = self.moments.read().iter().any(|m| {
            m.thumbnail()
                .is_some_and(|t| t.file_name() == thumbnail.file_name())
        });
        (!shared).then_some(thumbnail)
    }

    /// Whether the story payload, venue and author are resident
    #[must_use]
    pub fn is_digest_retrieved(&self) -> bool {
        self.object.is_resident()
            && self.venue().map_or(true, |v| v.is_retrieved())
            && self.author().map_or(true, |a| a.is_retrieved())
    }

    /// Run `ready` now if the digest is resident; otherwise run `not_ready`
    /// and park `ready` until `execute_ready`.
    ///
    /// Returns whether the digest was already resident. Only the latest
    /// parked callback is kept. `not_ready` runs while the parking lock is
    /// held and must not call back into this story's digest methods.
    pub fn execute_for_digest(
        &self,
        not_ready: impl FnOnce(),
        ready: impl FnOnce() + Send + 'static,
    ) -> bool {
        let mut parked = self.parked_ready.lock();
        if self.is_digest_retrieved() {
            *parked = None;
            drop(parked);
            ready();
            return true;
        }
        not_ready();
        *parked = Some(Box::new(ready));
        false
    }

    /// Fire the parked ready callback, if any
    pub fn execute_ready(&self) {
        let parked = self.parked_ready.lock().take();
        if let Some(ready) = parked {
            debug!(story = %self.object.id(), "digest ready");
            ready();
        }
    }

    /// Scope and tier moments are read from
    #[must_use]
    pub fn content_location(&self) -> (Scope, LocalTier) {
        *self.location.lock()
    }

    /// Read moments from `tier` within `scope` from now on
    pub fn set_content_location(&self, scope: Scope, tier: LocalTier) {
        *self.location.lock() = (scope, tier);
    }

    /// Retrieve the story with its venue and author, without moments
    pub async fn retrieve_digest(&self, scope: Scope, tier: LocalTier) -> Result<(), SyncError> {
        let story = self.strong()?;
        self.set_content_location(scope, tier);
        self.queue
            .enqueue("retrieve digest", OperationKind::Retrieve, move || async move {
                let notify = Arc::clone(&story);
                let ready = ReadyHook::new(move || notify.execute_ready());
                orchestrator::retrieve_tree(&*story, Purpose::Digest, scope, tier, false, Some(ready))
                    .await
            })
            .await
    }

    /// Save the story with its venue and author, without moments
    pub async fn save_digest(&self, scope: Scope, tier: LocalTier) -> Result<(), SyncError> {
        let story = self.strong()?;
        self.queue
            .enqueue("save digest", OperationKind::Save, move || async move {
                orchestrator::save_tree(&*story, Purpose::Digest, scope, tier).await
            })
            .await
    }

    /// Retrieve the moment at `index` through this story's queue
    pub async fn retrieve_moment(&self, index: usize) -> Result<(), SyncError> {
        let moment = self.moment(index).ok_or_else(|| {
            SyncError::PermanentValidation(format!("story has no moment at index {index}"))
        })?;
        self.retrieve_item(moment as NodeRef, false).await
    }

    /// Queue a retrieval of one content item.
    ///
    /// With `claim_pending` the item is only fetched if it is still pending
    /// once the job runs. Otherwise a synced item is left alone and one
    /// already being retrieved elsewhere is waited for, not fetched again.
    async fn retrieve_item(&self, item: NodeRef, claim_pending: bool) -> Result<(), SyncError> {
        let (scope, tier) = self.content_location();
        let label = if claim_pending { "retrieve content" } else { "retrieve moment" };
        self.queue
            .enqueue(label, OperationKind::Retrieve, move || async move {
                if claim_pending {
                    if !item.object().latch().retrieve_if_pending() {
                        return Ok(());
                    }
                } else if item.object().latch().wait_settled().await == RetrieveState::Synced {
                    return Ok(());
                }
                item.retrieve_recursive(scope, tier, false, None).await
            })
            .await
    }

    /// Mark moments `[from, from + count)` pending and make sure a content
    /// pass picks them up; `count == 0` means through the last moment
    pub fn request_content(self: &Arc<Self>, from: usize, count: usize, callback: Option<ContentCallback>) {
        content::request_content(self, from, count, callback);
    }

    /// Request the configured window of moments starting at `from`
    pub fn request_content_window(self: &Arc<Self>, from: usize, callback: Option<ContentCallback>) {
        let count = self.context.config().content_window;
        content::request_content(self, from, count, callback);
    }

    /// Single-flight content state
    #[inline]
    #[must_use]
    pub fn content(&self) -> &ContentStream {
        &self.content
    }

    /// Payload accessor
    #[inline]
    #[must_use]
    pub fn record(&self) -> &TieredObject<StoryRecord> {
        &self.object
    }

    fn resolve_moments(&self, ids: &[EntityId]) {
        let mut moments = self.moments.write();
        if moments.iter().map(|m| m.unique_identifier()).eq(ids.iter().cloned()) {
            return;
        }
        let existing = std::mem::take(&mut *moments);
        *moments = ids
            .iter()
            .map(|id| {
                existing
                    .iter()
                    .find(|m| &m.unique_identifier() == id)
                    .cloned()
                    .unwrap_or_else(|| Moment::reference(&self.context, id.clone()))
            })
            .collect();
    }

    fn resolve_markups(&self, ids: &[EntityId]) {
        let mut markups = self.markups.write();
        if markups.iter().map(|m| m.unique_identifier()).eq(ids.iter().cloned()) {
            return;
        }
        let existing = std::mem::take(&mut *markups);
        *markups = ids
            .iter()
            .map(|id| {
                existing
                    .iter()
                    .find(|m| &m.unique_identifier() == id)
                    .cloned()
                    .unwrap_or_else(|| Markup::reference(&self.context, id.clone()))
            })
            .collect();
    }
}

#[async_trait]
impl EntityNode for Story {
    fn type_name(&self) -> &'static str {
        "Story"
    }

    fn object(&self) -> &dyn StoredObject {
        &self.object
    }

    fn is_composite(&self) -> bool {
        true
    }

    /// Digest resident and every moment synced
    fn is_retrieved(&self) -> bool {
        self.is_digest_retrieved()
            && self
                .moments
                .read()
                .iter()
                .all(|m| m.retrieve_state() == RetrieveState::Synced)
    }

    fn resolve_children(&self) -> Result<(), SyncError> {
        let Some(record) = self.object.payload() else {
            return Ok(());
        };
        self.resolve_moments(&record.moment_ids);
        self.resolve_markups(&record.markup_ids);

        if let Some(file_name) = record.thumbnail_file_name {
            let mut thumbnail = self.thumbnail.write();
            if thumbnail.as_ref().map(|t| t.file_name()) != Some(file_name.as_str()) {
                *thumbnail = Some(Media::reference(&self.context, file_name, MediaKind::Photo));
            }
        }
        if let Some(id) = record.venue_id {
            let mut venue = self.venue.write();
            if venue.as_ref().map(|v| v.unique_identifier()) != Some(id.clone()) {
                *venue = Some(Venue::reference(&self.context, id));
            }
        }
        if let Some(id) = record.author_id {
            let mut author = self.author.write();
            if author.as_ref().map(|a| a.unique_identifier()) != Some(id.clone()) {
                *author = Some(User::reference(&self.context, id));
            }
        }
        Ok(())
    }

    fn children(&self, purpose: Purpose, tier: LocalTier) -> Vec<ChildLink> {
        let mut links = Vec::new();
        let cached = tier == LocalTier::Cache;

        match purpose {
            Purpose::Retrieve => {
                if let Some(thumbnail) = self.thumbnail() {
                    links.push(ChildLink::owned(thumbnail as NodeRef));
                }
            }
            Purpose::Save | Purpose::Delete => {
                if let Some(thumbnail) = self.detached_thumbnail() {
                    links.push(ChildLink::owned(thumbnail as NodeRef));
                }
            }
            Purpose::Digest => {}
        }

        if let Some(venue) = self.venue() {
            links.push(match purpose {
                Purpose::Delete => ChildLink::local_only(venue as NodeRef),
                _ => ChildLink::owned(venue as NodeRef),
            });
        }

        if purpose != Purpose::Digest {
            links.extend(self.moments().into_iter().map(|m| ChildLink::owned(m as NodeRef)));
            links.extend(self.markups().into_iter().map(|m| ChildLink::owned(m as NodeRef)));
        }

        if let Some(author) = self.author().filter(|_| cached) {
            match purpose {
                Purpose::Delete => {
                    if !self.context.is_current_user(&author.unique_identifier()) {
                        links.push(ChildLink::local_only(author as NodeRef));
                    }
                }
                _ => links.push(ChildLink::owned(author as NodeRef)),
            }
        }
        links
    }

    fn cancel_retrieve(&self) {
        self.queue.cancel_pending(OperationKind::Retrieve);
        self.object.retrieve_gate().cancel();
        for link in self.children(Purpose::Retrieve, LocalTier::Cache) {
            link.node.cancel_retrieve();
        }
    }

    fn cancel_save(&self) {
        self.queue.cancel_pending(OperationKind::Save);
        self.object.save_gate().cancel();
        for link in self.children(Purpose::Save, LocalTier::Cache) {
            link.node.cancel_save();
        }
    }

    async fn retrieve_recursive(
        &self,
        scope: Scope,
        tier: LocalTier,
        forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError> {
        let story = self.strong()?;
        self.set_content_location(scope, tier);
        self.queue
            .enqueue("retrieve", OperationKind::Retrieve, move || async move {
                orchestrator::retrieve_tree(&*story, Purpose::Retrieve, scope, tier, forced, ready).await
            })
            .await
    }

    async fn save_recursive(&self, scope: Scope, tier: LocalTier) -> Result<(), SyncError> {
        let story = self.strong()?;
        self.queue
            .enqueue("save", OperationKind::Save, move || async move {
                orchestrator::save_tree(&*story, Purpose::Save, scope, tier).await
            })
            .await
    }

    async fn delete_recursive(&self, scope: Scope, tier: LocalTier) -> Result<(), SyncError> {
        let story = self.strong()?;
        self.queue
            .enqueue("delete", OperationKind::Delete, move || async move {
                orchestrator::delete_tree(&*story, scope, tier).await
            })
            .await
    }
}

#[async_trait]
impl ContentSource for Story {
    fn content_item(&self, index: usize) -> Option<NodeRef> {
        self.moment(index).map(|m| m as NodeRef)
    }

    fn content_len(&self) -> usize {
        self.moments.read().len()
    }

    fn content_stream(&self) -> &ContentStream {
        &self.content
    }

    fn content_label(&self) -> String {
        format!("story {}", self.object.id())
    }

    async fn retrieve_content_item(&self, item: NodeRef) -> Result<(), SyncError> {
        self.retrieve_item(item, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::entities::user::UserRecord;
    use crate::entities::venue::VenueRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> Arc<SyncContext> {
        SyncContext::in_memory(SyncConfig::default())
    }

    fn moment(ctx: &Arc<SyncContext>, name: &str) -> Arc<Moment> {
        let media = Media::with_file_name(ctx, format!("{name}.jpg"), MediaKind::Photo, vec![1]);
        let thumb = Media::with_file_name(
            ctx,
            Media::thumbnail_file_name(media.file_name()),
            MediaKind::Photo,
            vec![2],
        );
        Moment::create(ctx, media, thumb)
    }

    fn types(links: &[ChildLink]) -> Vec<&'static str> {
        links.iter().map(|l| l.node.type_name()).collect()
    }

    #[test]
    fn moment_management_keeps_payload_in_step() {
        let ctx = context();
        let story = Story::create(&ctx, "brunch");
        let a = moment(&ctx, "a");
        let b = moment(&ctx, "b");
        let c = moment(&ctx, "c");

        story.add_moment(Arc::clone(&a)).unwrap();
        story.add_moment(Arc::clone(&c)).unwrap();
        story.add_moment_at(1, Arc::clone(&b)).unwrap();
        assert_eq!(story.index_of(&b), Some(1));
        assert!(story.add_moment_at(9, moment(&ctx, "d")).is_err());

        let removed = story.remove_moment(&a.unique_identifier()).unwrap();
        assert!(removed.is_some());
        assert_eq!(story.index_of(&c), Some(1));
        let ids = story.record().read(|r| r.moment_ids.clone()).unwrap();
        assert_eq!(ids, vec![b.unique_identifier(), c.unique_identifier()]);
    }

    #[test]
    fn children_follow_purpose_and_tier() {
        let ctx = context();
        let story = Story::create(&ctx, "dinner");
        let first = moment(&ctx, "m");
        story.set_thumbnail(first.thumbnail().unwrap()).unwrap();
        story.add_moment(first).unwrap();
        story.set_venue(Some(Venue::create(&ctx, VenueRecord::named("Cafe")))).unwrap();
        let author = User::create(&ctx, UserRecord::named("sam"));
        story.set_author(Some(Arc::clone(&author))).unwrap();

        assert_eq!(
            types(&story.children(Purpose::Retrieve, LocalTier::Cache)),
            ["Media", "Venue", "Moment", "User"]
        );
        assert_eq!(
            types(&story.children(Purpose::Retrieve, LocalTier::Draft)),
            ["Media", "Venue", "Moment"]
        );
        // thumbnail is owned by the moment for save and delete
        assert_eq!(
            types(&story.children(Purpose::Save, LocalTier::Cache)),
            ["Venue", "Moment", "User"]
        );
        assert_eq!(
            types(&story.children(Purpose::Digest, LocalTier::Cache)),
            ["Venue", "User"]
        );

        let delete = story.children(Purpose::Delete, LocalTier::Cache);
        assert_eq!(types(&delete), ["Venue", "Moment", "User"]);
        assert_eq!(delete[0].scope, Some(Scope::LocalOnly));
        assert_eq!(delete[2].scope, Some(Scope::LocalOnly));

        ctx.set_current_user(Some(author.unique_identifier()));
        assert_eq!(
            types(&story.children(Purpose::Delete, LocalTier::Cache)),
            ["Venue", "Moment"]
        );
    }

    #[test]
    fn parked_ready_runs_once_digest_arrives() {
        let ctx = context();
        let story = Story::reference(&ctx, EntityId::new("s1"));
        let not_ready = AtomicUsize::new(0);
        let ready = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ready);
        let resident = story.execute_for_digest(
            || {
                not_ready.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(!resident);
        assert_eq!(not_ready.load(Ordering::SeqCst), 1);
        assert_eq!(ready.load(Ordering::SeqCst), 0);

        story.execute_ready();
        story.execute_ready();
        assert_eq!(ready.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn digest_round_trip_skips_moments() {
        let ctx = context();
        let story = Story::create(&ctx, "lunch");
        story.add_moment(moment(&ctx, "x")).unwrap();
        story.set_venue(Some(Venue::create(&ctx, VenueRecord::named("Deli")))).unwrap();

        story.save_digest(Scope::LocalOnly, LocalTier::Draft).await.unwrap();

        let copy = Story::reference(&ctx, story.unique_identifier());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        copy.execute_for_digest(|| {}, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        copy.retrieve_digest(Scope::LocalOnly, LocalTier::Draft).await.unwrap();

        assert!(copy.is_digest_retrieved());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(copy.venue().unwrap().name().as_deref(), Some("Deli"));
        // moment was never saved, only referenced
        assert!(!copy.moments()[0].is_retrieved());
        assert!(!EntityNode::is_retrieved(&*copy));
    }
}

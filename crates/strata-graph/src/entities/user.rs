//! Users
//!
//! A user owns an optional profile photo. Stories reference their author;
//! the author is never deleted through a story beyond its cached copy.

use crate::context::SyncContext;
use crate::entities::media::{Media, MediaKind};
use crate::node::{ChildLink, EntityNode, NodeRef, Purpose, StoredObject};
use crate::object::TieredObject;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_store::{EntityId, LocalTier, Record, SyncError};

/// Stored user payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique handle
    pub username: String,
    /// Contact address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Profile photo file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_media: Option<String>,
    /// Stories this user published, newest last
    #[serde(default)]
    pub authored_stories: Vec<EntityId>,
}

impl UserRecord {
    /// User with just a handle
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            profile_media: None,
            authored_stories: Vec::new(),
        }
    }
}

impl Record for UserRecord {
    const KIND: &'static str = "user";
}

/// A user account
#[derive(Debug)]
pub struct User {
    object: TieredObject<UserRecord>,
    context: Arc<SyncContext>,
    profile: RwLock<Option<Arc<Media>>>,
}

impl User {
    /// New user
    pub fn create(context: &Arc<SyncContext>, record: UserRecord) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::new(
                EntityId::generate(),
                Arc::clone(&context.stores().users),
                record,
            ),
            context: Arc::clone(context),
            profile: RwLock::new(None),
        })
    }

    /// Unretrieved reference
    pub fn reference(context: &Arc<SyncContext>, id: EntityId) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::reference(id, Arc::clone(&context.stores().users)),
            context: Arc::clone(context),
            profile: RwLock::new(None),
        })
    }

    /// Handle, if resident
    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.object.read(|r| r.username.clone())
    }

    /// Profile photo node, once resolved
    #[must_use]
    pub fn profile_media(&self) -> Option<Arc<Media>> {
        self.profile.read().clone()
    }

    /// Attach a profile photo
    pub fn set_profile_media(&self, media: Arc<Media>) -> Result<(), SyncError> {
        let file_name = media.file_name().to_string();
        self.object.update(|r| r.profile_media = Some(file_name))?;
        *self.profile.write() = Some(media);
        Ok(())
    }

    /// Record a published story
    pub fn add_authored_story(&self, story: EntityId) -> Result<(), SyncError> {
        self.object.update(|r| {
            if !r.authored_stories.contains(&story) {
                r.authored_stories.push(story);
            }
        })
    }

    /// Forget a published story
    pub fn remove_authored_story(&self, story: &EntityId) -> Result<(), SyncError> {
        self.object
            .update(|r| r.authored_stories.retain(|s| s != story))
    }

    /// Published stories, if resident
    #[must_use]
    pub fn authored_stories(&self) -> Option<Vec<EntityId>> {
        self.object.read(|r| r.authored_stories.clone())
    }

    /// Payload accessor
    #[inline]
    #[must_use]
    pub fn record(&self) -> &TieredObject<UserRecord> {
        &self.object
    }
}

impl EntityNode for User {
    fn type_name(&self) -> &'static str {
        "User"
    }

    fn object(&self) -> &dyn StoredObject {
        &self.object
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn resolve_children(&self) -> Result<(), SyncError> {
        if self.profile.read().is_some() {
            return Ok(());
        }
        let Some(file_name) = self.object.read(|r| r.profile_media.clone()).flatten() else {
            return Ok(());
        };
        let mut profile = self.profile.write();
        if profile.is_none() {
            *profile = Some(Media::reference(&self.context, file_name, MediaKind::Photo));
        }
        Ok(())
    }

    fn children(&self, _purpose: Purpose, _tier: LocalTier) -> Vec<ChildLink> {
        self.profile
            .read()
            .iter()
            .map(|media| ChildLink::owned(Arc::clone(media) as NodeRef))
            .collect()
    }
}

//! Moments
//!
//! A moment is one photo or video in a story, with its thumbnail and any
//! markup overlays drawn on top of it. Media, thumbnail and markups are
//! owned children for every operation.

use crate::context::SyncContext;
use crate::entities::markup::Markup;
use crate::entities::media::{Media, MediaKind};
use crate::node::{ChildLink, EntityNode, NodeRef, Purpose, StoredObject};
use crate::object::TieredObject;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_store::{EntityId, LocalTier, Record, SyncError};

/// Stored moment payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentRecord {
    /// Media file name
    pub media_file_name: String,
    /// Photo or video
    pub media_kind: MediaKind,
    /// Thumbnail file name
    pub thumbnail_file_name: String,
    /// Markup overlays, bottom first
    #[serde(default)]
    pub markup_ids: Vec<EntityId>,
    /// Capture latitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Capture longitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Width over height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f64>,
    /// Pixel width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Video start offset in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playing_start_ms: Option<u64>,
}

impl Record for MomentRecord {
    const KIND: &'static str = "moment";
}

/// One photo or video in a story
#[derive(Debug)]
pub struct Moment {
    object: TieredObject<MomentRecord>,
    context: Arc<SyncContext>,
    media: RwLock<Option<Arc<Media>>>,
    thumbnail: RwLock<Option<Arc<Media>>>,
    markups: RwLock<Vec<Arc<Markup>>>,
}

impl Moment {
    /// New moment around freshly captured media
    pub fn create(context: &Arc<SyncContext>, media: Arc<Media>, thumbnail: Arc<Media>) -> Arc<Self> {
        let record = MomentRecord {
            media_file_name: media.file_name().to_string(),
            media_kind: media.kind(),
            thumbnail_file_name: thumbnail.file_name().to_string(),
            markup_ids: Vec::new(),
            latitude: None,
            longitude: None,
            aspect_ratio: None,
            width: None,
            playing_start_ms: None,
        };
        Arc::new(Self {
            object: TieredObject::new(
                EntityId::generate(),
                Arc::clone(&context.stores().moments),
                record,
            ),
            context: Arc::clone(context),
            media: RwLock::new(Some(media)),
            thumbnail: RwLock::new(Some(thumbnail)),
            markups: RwLock::new(Vec::new()),
        })
    }

    /// Unretrieved reference
    pub fn reference(context: &Arc<SyncContext>, id: EntityId) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::reference(id, Arc::clone(&context.stores().moments)),
            context: Arc::clone(context),
            media: RwLock::new(None),
            thumbnail: RwLock::new(None),
            markups: RwLock::new(Vec::new()),
        })
    }

    /// Media node, once resolved
    #[must_use]
    pub fn media(&self) -> Option<Arc<Media>> {
        self.media.read().clone()
    }

    /// Thumbnail node, once resolved
    #[must_use]
    pub fn thumbnail(&self) -> Option<Arc<Media>> {
        self.thumbnail.read().clone()
    }

    /// Markup nodes, bottom first
    #[must_use]
    pub fn markups(&self) -> Vec<Arc<Markup>> {
        self.markups.read().clone()
    }

    /// Whether the media payload is in memory
    #[must_use]
    pub fn is_media_ready(&self) -> bool {
        self.media().is_some_and(|m| m.is_retrieved())
    }

    /// Draw a markup on top
    pub fn add_markup(&self, markup: Arc<Markup>) -> Result<(), SyncError> {
        let id = markup.unique_identifier();
        self.object.update(|r| r.markup_ids.push(id))?;
        self.markups.write().push(markup);
        Ok(())
    }

    /// Remove every markup
    pub fn clear_markups(&self) -> Result<Vec<Arc<Markup>>, SyncError> {
        self.object.update(|r| r.markup_ids.clear())?;
        Ok(std::mem::take(&mut *self.markups.write()))
    }

    /// Update capture metadata
    pub fn set_geometry(&self, aspect_ratio: f64, width: u32) -> Result<(), SyncError> {
        self.object.update(|r| {
            r.aspect_ratio = Some(aspect_ratio);
            r.width = Some(width);
        })
    }

    /// Payload accessor
    #[inline]
    #[must_use]
    pub fn record(&self) -> &TieredObject<MomentRecord> {
        &self.object
    }
}

impl EntityNode for Moment {
    fn type_name(&self) -> &'static str {
        "Moment"
    }

    fn object(&self) -> &dyn StoredObject {
        &self.object
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn resolve_children(&self) -> Result<(), SyncError> {
        let Some(record) = self.object.payload() else {
            return Ok(());
        };
        if record.media_file_name.is_empty() {
            return Err(SyncError::PermanentValidation(format!(
                "moment {} has no media file name",
                self.object.id()
            )));
        }

        {
            let mut media = self.media.write();
            if media.as_ref().map(|m| m.file_name()) != Some(record.media_file_name.as_str()) {
                *media = Some(Media::reference(
                    &self.context,
                    record.media_file_name.clone(),
                    record.media_kind,
                ));
            }
        }

        if !record.thumbnail_file_name.is_empty() {
            let mut thumbnail = self.thumbnail.write();
            if thumbnail.as_ref().map(|m| m.file_name()) != Some(record.thumbnail_file_name.as_str()) {
                *thumbnail = Some(Media::reference(
                    &self.context,
                    record.thumbnail_file_name.clone(),
                    MediaKind::Photo,
                ));
            }
        }

        let mut markups = self.markups.write();
        let current: Vec<EntityId> = markups.iter().map(|m| m.unique_identifier()).collect();
        if current != record.markup_ids {
            let existing = std::mem::take(&mut *markups);
            *markups = record
                .markup_ids
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
        Ok(())
    }

    fn children(&self, _purpose: Purpose, _tier: LocalTier) -> Vec<ChildLink> {
        let mut links = Vec::new();
        if let Some(media) = self.media() {
            links.push(ChildLink::owned(media as NodeRef));
        }
        if let Some(thumbnail) = self.thumbnail() {
            links.push(ChildLink::owned(thumbnail as NodeRef));
        }
        links.extend(
            self.markups()
                .into_iter()
                .map(|m| ChildLink::owned(m as NodeRef)),
        );
        links
    }
}

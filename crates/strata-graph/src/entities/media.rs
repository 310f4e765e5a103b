//! Photo and video files

use crate::context::SyncContext;
use crate::node::{EntityNode, ReadyHook, StoredObject};
use crate::object::TieredObject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_store::{EntityId, LocalTier, Record, SyncError};

/// Kind of media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still image
    Photo,
    /// Video clip
    Video,
}

impl MediaKind {
    /// File extension used for new files
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video => "mp4",
        }
    }
}

/// Stored media payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// File name, also the storage key
    pub file_name: String,
    /// Photo or video
    pub kind: MediaKind,
    /// Encoded file contents
    pub bytes: Vec<u8>,
}

impl Record for MediaRecord {
    const KIND: &'static str = "media";
}

/// A media file
#[derive(Debug)]
pub struct Media {
    object: TieredObject<MediaRecord>,
    kind: MediaKind,
}

impl Media {
    /// New media with a generated file name
    pub fn create(context: &SyncContext, kind: MediaKind, bytes: Vec<u8>) -> Arc<Self> {
        let file_name = Self::new_file_name(kind);
        Self::with_file_name(context, file_name, kind, bytes)
    }

    /// New media under a known file name
    pub fn with_file_name(
        context: &SyncContext,
        file_name: impl Into<String>,
        kind: MediaKind,
        bytes: Vec<u8>,
    ) -> Arc<Self> {
        let file_name = file_name.into();
        let record = MediaRecord {
            file_name: file_name.clone(),
            kind,
            bytes,
        };
        Arc::new(Self {
            object: TieredObject::new(
                EntityId::new(file_name),
                Arc::clone(&context.stores().media),
                record,
            ),
            kind,
        })
    }

    /// Unretrieved reference to an existing file
    pub fn reference(context: &SyncContext, file_name: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::reference(
                EntityId::new(file_name.into()),
                Arc::clone(&context.stores().media),
            ),
            kind,
        })
    }

    /// Fresh unique file name for `kind`
    #[must_use]
    pub fn new_file_name(kind: MediaKind) -> String {
        format!("{}.{}", EntityId::generate(), kind.extension())
    }

    /// Thumbnail file name derived from an original file name
    #[must_use]
    pub fn thumbnail_file_name(original: &str) -> String {
        let stem = original
            .rsplit_once('.')
            .map_or(original, |(stem, _)| stem);
        format!("{stem}_thumbnail.jpg")
    }

    /// File name
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.object.id().as_str()
    }

    /// Photo or video
    #[inline]
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// File contents, if resident
    #[must_use]
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.object.read(|r| r.bytes.clone())
    }

    /// Payload accessor
    #[inline]
    #[must_use]
    pub fn record(&self) -> &TieredObject<MediaRecord> {
        &self.object
    }
}

#[async_trait]
impl EntityNode for Media {
    fn type_name(&self) -> &'static str {
        "Media"
    }

    fn object(&self) -> &dyn StoredObject {
        &self.object
    }

    async fn retrieve_from_local_then_remote(
        &self,
        tier: LocalTier,
        forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError> {
        // Video is playable while it streams in
        if self.kind == MediaKind::Video {
            if let Some(ready) = &ready {
                ready.fire();
            }
        }
        self.object
            .retrieve_from_local_then_remote(tier, forced, ready)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_names_derive_from_original() {
        assert_eq!(Media::thumbnail_file_name("abc.mp4"), "abc_thumbnail.jpg");
        assert_eq!(Media::thumbnail_file_name("noext"), "noext_thumbnail.jpg");
    }

    #[test]
    fn generated_names_carry_extension() {
        assert!(Media::new_file_name(MediaKind::Video).ends_with(".mp4"));
        assert!(Media::new_file_name(MediaKind::Photo).ends_with(".jpg"));
    }
}

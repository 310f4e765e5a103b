//! Markup overlays drawn on top of a moment

use crate::context::SyncContext;
use crate::node::{EntityNode, StoredObject};
use crate::object::TieredObject;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_store::{EntityId, Record};

/// Stored markup payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupRecord {
    /// Serialized overlay (stickers, text, drawings)
    pub data: serde_json::Value,
    /// Search keyword carried by the overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl Record for MarkupRecord {
    const KIND: &'static str = "markup";
}

/// A markup overlay
#[derive(Debug)]
pub struct Markup {
    object: TieredObject<MarkupRecord>,
}

impl Markup {
    /// New overlay
    pub fn create(context: &SyncContext, data: serde_json::Value, keyword: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::new(
                EntityId::generate(),
                Arc::clone(&context.stores().markups),
                MarkupRecord { data, keyword },
            ),
        })
    }

    /// Unretrieved reference
    pub fn reference(context: &SyncContext, id: EntityId) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::reference(id, Arc::clone(&context.stores().markups)),
        })
    }

    /// Overlay data, if resident
    #[must_use]
    pub fn data(&self) -> Option<serde_json::Value> {
        self.object.read(|r| r.data.clone())
    }

    /// Payload accessor
    #[inline]
    #[must_use]
    pub fn record(&self) -> &TieredObject<MarkupRecord> {
        &self.object
    }
}

impl EntityNode for Markup {
    fn type_name(&self) -> &'static str {
        "Markup"
    }

    fn object(&self) -> &dyn StoredObject {
        &self.object
    }
}

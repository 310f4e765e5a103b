//! Venues
//!
//! Venues are shared between stories. They are retrieved and saved through
//! a story, but a story only ever removes its local copy.

use crate::context::SyncContext;
use crate::node::{EntityNode, StoredObject};
use crate::object::TieredObject;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_store::{EntityId, Record};

/// Stored venue payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRecord {
    /// Display name
    pub name: String,
    /// Identifier in the third-party places directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    /// Latitude in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// City or locality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl VenueRecord {
    /// Venue with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory_id: None,
            latitude: None,
            longitude: None,
            locality: None,
        }
    }
}

impl Record for VenueRecord {
    const KIND: &'static str = "venue";
}

/// A venue
#[derive(Debug)]
pub struct Venue {
    object: TieredObject<VenueRecord>,
}

impl Venue {
    /// New venue
    pub fn create(context: &SyncContext, record: VenueRecord) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::new(
                EntityId::generate(),
                Arc::clone(&context.stores().venues),
                record,
            ),
        })
    }

    /// Unretrieved reference
    pub fn reference(context: &SyncContext, id: EntityId) -> Arc<Self> {
        Arc::new(Self {
            object: TieredObject::reference(id, Arc::clone(&context.stores().venues)),
        })
    }

    /// Display name, if resident
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.object.read(|r| r.name.clone())
    }

    /// Payload accessor
    #[inline]
    #[must_use]
    pub fn record(&self) -> &TieredObject<VenueRecord> {
        &self.object
    }
}

impl EntityNode for Venue {
    fn type_name(&self) -> &'static str {
        "Venue"
    }

    fn object(&self) -> &dyn StoredObject {
        &self.object
    }
}

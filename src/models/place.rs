//! Place records stored in the place table.

use chrono::{DateTime, Utc};
use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};

use super::BBox;

/// A polygon or multipolygon with identity.
///
/// `id` is assigned by whoever produced the record and never changes.
/// `geometry` is lon/lat (EPSG:4326); `None` means it is not resolved yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: i64,

    pub name: String,

    /// Classification, e.g. administrative level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,

    #[serde(default)]
    pub geometry: Option<MultiPolygon<f64>>,
}

impl Place {
    /// Create a place without layer or geometry
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            layer: None,
            geometry: None,
        }
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn with_geometry(mut self, geometry: MultiPolygon<f64>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Bounding box of the geometry, if any
    pub fn bbox(&self) -> Option<BBox> {
        self.geometry.as_ref().and_then(BBox::of)
    }
}

/// Persisted row: the place plus its bounding box entry.
///
/// Geometry and bbox share one row so a geometry write can never leave a
/// stale box behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PlaceRecord {
    pub place: Place,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,

    /// Last geometry write
    pub updated_at: DateTime<Utc>,
}

impl PlaceRecord {
    pub fn new(place: Place) -> Self {
        let bbox = place.bbox();
        Self {
            place,
            bbox,
            updated_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

pub(crate) fn place_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

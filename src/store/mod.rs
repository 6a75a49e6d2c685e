//! Place store: durable id -> place mapping plus the bounding-box index.
//!
//! Places live in a sled tree and are mirrored in memory together with a
//! [`BoxIndex`]. A single `RwLock` arbitrates access: geometry writes take
//! the write lock and update the row, the in-memory copy and the box entry
//! before releasing it, so readers never see a geometry with a stale box.

mod cells;

use std::path::Path;
use std::sync::Arc;

use geo_types::MultiPolygon;
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{PlaceError, Result};
use crate::geometry::{GeoEngine, GeometryEngine};
use crate::models::place::{place_key, PlaceRecord};
use crate::models::{BBox, Place};
use crate::pip::{BoxIndex, RTreeIndex};
use crate::report::BatchReport;

pub(crate) use cells::CellTable;

const PLACES_TREE: &str = "places";

struct Entry {
    place: Arc<Place>,
    bbox: Option<BBox>,
}

struct StoreState {
    places: HashMap<i64, Entry>,
    index: Box<dyn BoxIndex>,
}

impl StoreState {
    fn put(&mut self, record: PlaceRecord) {
        let id = record.place.id;
        if let Some(previous) = self.places.remove(&id) {
            if let Some(bbox) = previous.bbox {
                self.index.remove(id, &bbox);
            }
        }
        if let Some(bbox) = record.bbox {
            self.index.insert(id, bbox);
        }
        self.places.insert(
            id,
            Entry {
                place: Arc::new(record.place),
                bbox: record.bbox,
            },
        );
    }
}

/// Read-consistent view of the store.
///
/// Holds the store's read lock: no geometry can change while a view is
/// alive, so pruning and exact tests done through one view agree.
pub struct StoreView<'a> {
    state: RwLockReadGuard<'a, StoreState>,
    engine: &'a dyn GeometryEngine,
}

impl<'a> StoreView<'a> {
    pub fn get(&self, id: i64) -> Option<&Arc<Place>> {
        self.state.places.get(&id).map(|e| &e.place)
    }

    pub fn bbox(&self, id: i64) -> Option<BBox> {
        self.state.places.get(&id).and_then(|e| e.bbox)
    }

    pub fn len(&self) -> usize {
        self.state.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.places.is_empty()
    }

    pub fn places(&self) -> impl Iterator<Item = &Arc<Place>> {
        self.state.places.values().map(|e| &e.place)
    }

    pub fn candidates_overlapping(&self, rect: &BBox) -> Vec<i64> {
        self.state.index.candidates_overlapping(rect)
    }

    pub fn candidates_enclosed_by(&self, rect: &BBox) -> Vec<i64> {
        self.state.index.candidates_enclosed_by(rect)
    }

    pub fn candidates_enclosing(&self, rect: &BBox) -> Vec<i64> {
        self.state.index.candidates_enclosing(rect)
    }

    pub fn engine(&self) -> &'a dyn GeometryEngine {
        self.engine
    }

    /// Place and geometry for a geometric query. Unknown ids and null
    /// geometries are both `NotFound`.
    pub(crate) fn require_geometry(
        &self,
        id: i64,
    ) -> Result<(&Arc<Place>, &MultiPolygon<f64>, BBox)> {
        let entry = self.state.places.get(&id).ok_or(PlaceError::NotFound(id))?;
        match (entry.place.geometry.as_ref(), entry.bbox) {
            (Some(geometry), Some(bbox)) => Ok((&entry.place, geometry, bbox)),
            _ => Err(PlaceError::NotFound(id)),
        }
    }
}

/// Durable store of places, their bounding boxes and grid cells.
pub struct PlaceStore {
    db: sled::Db,
    places: sled::Tree,
    cells: CellTable,
    state: RwLock<StoreState>,
    engine: Arc<dyn GeometryEngine>,
    flush_on_close: bool,
}

impl PlaceStore {
    /// Open (or create) a store directory with the default engine and index
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        Self::open_with(
            path,
            config,
            Arc::new(GeoEngine::new()),
            Box::new(RTreeIndex::new()),
        )
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        config: &StoreConfig,
        engine: Arc<dyn GeometryEngine>,
        index: Box<dyn BoxIndex>,
    ) -> Result<Self> {
        info!("Opening place store at {}", path.as_ref().display());
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(config.cache_capacity)
            .open()?;
        Self::from_db(db, engine, index, config.flush_on_close)
    }

    /// In-memory store that is discarded on drop
    pub fn temporary() -> Result<Self> {
        Self::temporary_with(Arc::new(GeoEngine::new()), Box::new(RTreeIndex::new()))
    }

    pub fn temporary_with(
        engine: Arc<dyn GeometryEngine>,
        index: Box<dyn BoxIndex>,
    ) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, engine, index, false)
    }

    fn from_db(
        db: sled::Db,
        engine: Arc<dyn GeometryEngine>,
        mut index: Box<dyn BoxIndex>,
        flush_on_close: bool,
    ) -> Result<Self> {
        let places = db.open_tree(PLACES_TREE)?;

        let mut map = HashMap::new();
        let mut boxes = Vec::new();
        for item in places.iter() {
            let (_, value) = item?;
            let record = PlaceRecord::from_bytes(&value)?;
            let id = record.place.id;
            if let Some(bbox) = record.bbox {
                boxes.push((id, bbox));
            }
            map.insert(
                id,
                Entry {
                    place: Arc::new(record.place),
                    bbox: record.bbox,
                },
            );
        }
        index.load(boxes);
        info!(
            "Loaded {} places ({} with geometry)",
            map.len(),
            index.len()
        );

        let cells = CellTable::open(&db)?;

        Ok(Self {
            db,
            places,
            cells,
            state: RwLock::new(StoreState { places: map, index }),
            engine,
            flush_on_close,
        })
    }

    /// Flush pending writes and release the store
    pub fn close(self) -> Result<()> {
        if self.flush_on_close {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn engine(&self) -> &dyn GeometryEngine {
        self.engine.as_ref()
    }

    pub(crate) fn cells(&self) -> &CellTable {
        &self.cells
    }

    /// Take a read-consistent view
    pub fn read(&self) -> StoreView<'_> {
        StoreView {
            state: self.state.read(),
            engine: self.engine.as_ref(),
        }
    }

    fn repaired(&self, mut place: Place) -> Result<Place> {
        if let Some(geometry) = place.geometry.take() {
            place.geometry = Some(self.engine.make_valid(geometry)?);
        }
        Ok(place)
    }

    /// Insert a new place.
    ///
    /// Fails with `DuplicateId` when the id is taken and `InvalidGeometry`
    /// when the geometry cannot be repaired.
    pub fn insert(&self, place: Place) -> Result<()> {
        let mut state = self.state.write();
        if state.places.contains_key(&place.id) {
            return Err(PlaceError::DuplicateId(place.id));
        }

        let record = PlaceRecord::new(self.repaired(place)?);
        self.places
            .insert(place_key(record.place.id), record.to_bytes()?)?;
        debug!("Inserted place {} ({})", record.place.id, record.place.name);
        state.put(record);
        Ok(())
    }

    /// Insert many places, continuing past per-place failures.
    pub fn insert_batch<I>(&self, places: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = Place>,
    {
        let mut report = BatchReport::new();
        for place in places {
            let id = place.id;
            match self.insert(place) {
                Ok(()) => report.record_success(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping place {}: {}", id, e);
                    report.record_failure(id, &e);
                }
            }
        }
        info!(
            "Inserted {} places ({} failed)",
            report.succeeded.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Replace a place's geometry and its bounding box in one step.
    ///
    /// `None` clears the geometry. Returns the new bounding box.
    pub fn update_geometry(
        &self,
        id: i64,
        geometry: Option<MultiPolygon<f64>>,
    ) -> Result<Option<BBox>> {
        let mut state = self.state.write();
        let current = state.places.get(&id).ok_or(PlaceError::NotFound(id))?;

        let mut place = (*current.place).clone();
        place.geometry = geometry;
        let record = PlaceRecord::new(self.repaired(place)?);
        let bbox = record.bbox;

        self.places.insert(place_key(id), record.to_bytes()?)?;
        state.put(record);
        debug!("Updated geometry of place {}", id);
        Ok(bbox)
    }

    /// Delete a place and every grid cell clipped from it.
    pub fn remove(&self, id: i64) -> Result<Arc<Place>> {
        let mut state = self.state.write();
        if !state.places.contains_key(&id) {
            return Err(PlaceError::NotFound(id));
        }

        self.cells.remove_place(&self.places, id)?;

        let entry = state.places.remove(&id).ok_or(PlaceError::NotFound(id))?;
        if let Some(bbox) = entry.bbox {
            state.index.remove(id, &bbox);
        }
        Ok(entry.place)
    }

    pub fn get(&self, id: i64) -> Option<Arc<Place>> {
        self.state.read().places.get(&id).map(|e| Arc::clone(&e.place))
    }

    pub fn exists(&self, id: i64) -> bool {
        self.state.read().places.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state.read().places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids, ascending
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.state.read().places.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Copy already-valid places in as one batch. Nothing is written when
    /// any id is present already.
    pub(crate) fn import_all(&self, places: &[Arc<Place>]) -> Result<()> {
        let mut state = self.state.write();

        let mut conflicts: Vec<i64> = places
            .iter()
            .map(|p| p.id)
            .filter(|id| state.places.contains_key(id))
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort_unstable();
            return Err(PlaceError::TargetAlreadyInitialized(conflicts));
        }

        let records: Vec<PlaceRecord> = places
            .iter()
            .map(|p| PlaceRecord::new(Place::clone(p)))
            .collect();
        let mut batch = sled::Batch::default();
        for record in &records {
            batch.insert(place_key(record.place.id).to_vec(), record.to_bytes()?);
        }
        self.places.apply_batch(batch)?;

        for record in records {
            state.put(record);
        }
        Ok(())
    }

    /// Run every geometry through `make_valid` again.
    pub fn repair_all(&self) -> Result<BatchReport> {
        info!("Repairing geometries...");
        self.rewrite_geometries(|engine, geometry| engine.make_valid(geometry.clone()))
    }

    /// Simplify every geometry, preserving topology.
    pub fn simplify_all(&self, tolerance: f64) -> Result<BatchReport> {
        info!("Simplifying geometries with tolerance {}...", tolerance);
        self.rewrite_geometries(|engine, geometry| {
            Ok(engine.simplify_preserve_topology(geometry, tolerance))
        })
    }

    fn rewrite_geometries<F>(&self, rewrite: F) -> Result<BatchReport>
    where
        F: Fn(&dyn GeometryEngine, &MultiPolygon<f64>) -> Result<MultiPolygon<f64>>,
    {
        let mut report = BatchReport::new();
        for id in self.ids() {
            let Some(place) = self.get(id) else {
                continue;
            };
            let Some(geometry) = place.geometry.as_ref() else {
                continue;
            };

            let outcome = rewrite(self.engine(), geometry).and_then(|rewritten| {
                if &rewritten == geometry {
                    Ok(())
                } else {
                    self.update_geometry(id, Some(rewritten)).map(|_| ())
                }
            });

            match outcome {
                Ok(()) => report.record_success(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Geometry of place {} left unchanged: {}", id, e);
                    report.record_failure(id, &e);
                }
            }
        }
        info!(
            "Rewrote {} geometries ({} failed)",
            report.succeeded.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

//! Point-in-polygon and containment queries.

use geo_types::{MultiPolygon, Point};
use tracing::debug;

use crate::error::Result;
use crate::grid::GridIndex;
use crate::models::BBox;
use crate::store::{PlaceStore, StoreView};

/// How a point-in-polygon query finds its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipStrategy {
    /// Exact test against every place
    Exhaustive,
    /// Exact test against bounding-box candidates only
    Pruned,
    /// Grid cell lookup without exact re-test
    Grid,
}

/// Query engine over a [`PlaceStore`].
pub struct QueryEngine<'a> {
    store: &'a PlaceStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a PlaceStore) -> Self {
        Self { store }
    }

    /// Ids of places containing the point, ascending
    pub fn pip(&self, lon: f64, lat: f64, strategy: PipStrategy) -> Vec<i64> {
        match strategy {
            PipStrategy::Exhaustive => self.pip_exhaustive(lon, lat),
            PipStrategy::Pruned => self.pip_pruned(lon, lat),
            PipStrategy::Grid => self.pip_grid(lon, lat),
        }
    }

    pub fn pip_exhaustive(&self, lon: f64, lat: f64) -> Vec<i64> {
        let view = self.store.read();
        let point = Point::new(lon, lat);
        let engine = view.engine();

        let ids = view
            .places()
            .filter(|p| {
                p.geometry
                    .as_ref()
                    .is_some_and(|g| engine.contains_point(g, point))
            })
            .map(|p| p.id)
            .collect();
        sorted(ids)
    }

    pub fn pip_pruned(&self, lon: f64, lat: f64) -> Vec<i64> {
        let view = self.store.read();
        let point = Point::new(lon, lat);
        let engine = view.engine();

        let candidates = view.candidates_overlapping(&BBox::point(lon, lat));
        let tested = candidates.len();
        let ids: Vec<i64> = candidates
            .into_iter()
            .filter(|id| {
                view.get(*id)
                    .and_then(|p| p.geometry.as_ref())
                    .is_some_and(|g| engine.contains_point(g, point))
            })
            .collect();

        debug!(
            "PIP at ({}, {}): {} candidates, {} matches",
            lon,
            lat,
            tested,
            ids.len()
        );
        sorted(ids)
    }

    pub fn pip_grid(&self, lon: f64, lat: f64) -> Vec<i64> {
        GridIndex::new(self.store).lookup_point(lon, lat)
    }

    /// Places exactly contained by place `id`, ascending.
    ///
    /// Fails with `NotFound` for unknown ids and for places without a
    /// geometry.
    pub fn find_children(&self, id: i64) -> Result<Vec<i64>> {
        let view = self.store.read();
        contained_in(&view, id)
    }

    /// Places exactly containing place `id`, ascending.
    pub fn find_parents(&self, id: i64) -> Result<Vec<i64>> {
        let view = self.store.read();
        let (_, geometry, bbox) = view.require_geometry(id)?;
        let engine = view.engine();

        let ids = view
            .candidates_enclosing(&bbox)
            .into_iter()
            .filter(|candidate| *candidate != id)
            .filter(|candidate| {
                candidate_geometry(&view, *candidate).is_some_and(|g| engine.within(geometry, g))
            })
            .collect();
        Ok(sorted(ids))
    }
}

/// Children of `id` within one consistent view; shared with extraction.
pub(crate) fn contained_in(view: &StoreView<'_>, id: i64) -> Result<Vec<i64>> {
    let (_, geometry, bbox) = view.require_geometry(id)?;
    let engine = view.engine();

    let candidates = view.candidates_enclosed_by(&bbox);
    let tested = candidates.len();
    let ids: Vec<i64> = candidates
        .into_iter()
        .filter(|candidate| *candidate != id)
        .filter(|candidate| {
            candidate_geometry(view, *candidate).is_some_and(|g| engine.contains(geometry, g))
        })
        .collect();

    debug!(
        "Children of {}: {} box candidates, {} contained",
        id,
        tested,
        ids.len()
    );
    Ok(sorted(ids))
}

fn candidate_geometry<'v>(view: &'v StoreView<'_>, id: i64) -> Option<&'v MultiPolygon<f64>> {
    view.get(id).and_then(|p| p.geometry.as_ref())
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

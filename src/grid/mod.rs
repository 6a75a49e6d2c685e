//! Tile decomposition of place geometries.
//!
//! Each place is clipped into 1°×1° tiles; a point lookup then only looks
//! at the cells of the point's tile. Tiles are independent, so ranges are
//! built in parallel on the rayon pool.
//!
//! Cells are clipped exactly at tile edges. A point inside a tile is tested
//! with strict containment against that tile's cells. A point on a tile
//! edge or corner is tested against the union of each place's cells in
//! every tile touching it, so the seam between two cells counts as
//! interior while a real place boundary does not.

use std::sync::Arc;

use geo_types::{MultiPolygon, Point};
use hashbrown::HashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{GridCell, TileId};
use crate::report::{GridBuildReport, TileFailure};
use crate::store::{PlaceStore, StoreView};

/// What `build_tile` does with the tile's existing cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Clear the tile first; rebuilding is idempotent
    #[default]
    Replace,
    /// Append; rebuilding duplicates cells
    Additive,
}

/// Builds and queries the grid cells of a [`PlaceStore`].
pub struct GridIndex<'a> {
    store: &'a PlaceStore,
    mode: BuildMode,
}

impl<'a> GridIndex<'a> {
    pub fn new(store: &'a PlaceStore) -> Self {
        Self {
            store,
            mode: BuildMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Clip every place overlapping the tile into it. Returns the number of
    /// cells written.
    ///
    /// The places view stays open until the cells are written, so a place
    /// removed concurrently either loses these cells in its cascade or is
    /// never clipped.
    pub fn build_tile(&self, tile: TileId) -> Result<usize> {
        let view = self.store.read();
        let fragments = clip_tile(&view, tile);
        let additive = self.mode == BuildMode::Additive;
        if fragments.is_empty() && additive {
            return Ok(0);
        }
        let written = self.store.cells().write_tile(tile, fragments, additive)?;
        drop(view);
        Ok(written)
    }

    /// Build every tile in the inclusive range.
    ///
    /// A failing tile is recorded in the report and the build goes on; a
    /// fatal (storage) error aborts the whole range.
    pub fn build_range(
        &self,
        min_x: i32,
        min_y: i32,
        max_x: i32,
        max_y: i32,
    ) -> Result<GridBuildReport> {
        self.build_range_with(min_x, min_y, max_x, max_y, |_| {})
    }

    /// [`GridIndex::build_range`] with a callback after each tile, e.g. to
    /// drive a progress bar.
    pub fn build_range_with<F>(
        &self,
        min_x: i32,
        min_y: i32,
        max_x: i32,
        max_y: i32,
        on_tile: F,
    ) -> Result<GridBuildReport>
    where
        F: Fn(TileId) + Sync,
    {
        let tiles = TileId::range(min_x, min_y, max_x, max_y);
        info!(
            "Building grid over {} tiles ({}, {}) .. ({}, {}) in {:?} mode",
            tiles.len(),
            min_x,
            min_y,
            max_x,
            max_y,
            self.mode
        );

        let outcomes = tiles
            .par_iter()
            .map(|tile| {
                let outcome = match self.build_tile(*tile) {
                    Ok(written) => Ok((*tile, Ok(written))),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        warn!("Tile {} failed: {}", tile, e);
                        Ok((*tile, Err(e.to_string())))
                    }
                };
                on_tile(*tile);
                outcome
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = GridBuildReport::default();
        for (tile, outcome) in outcomes {
            match outcome {
                Ok(written) => {
                    report.tiles_built += 1;
                    report.cells_written += written;
                    if written > 0 {
                        report.tiles_with_cells += 1;
                    }
                }
                Err(error) => report.failures.push(TileFailure { tile, error }),
            }
        }

        info!(
            "Grid build done: {} tiles, {} cells, {} failures",
            report.tiles_built,
            report.cells_written,
            report.failures.len()
        );
        Ok(report)
    }

    /// Drop a tile's cells, returning how many were removed.
    pub fn clear_tile(&self, tile: TileId) -> Result<usize> {
        self.store.cells().clear_tile(tile)
    }

    /// Ids of places with a cell containing the point, ascending.
    pub fn lookup_point(&self, lon: f64, lat: f64) -> Vec<i64> {
        let tiles = TileId::touching(lon, lat);
        let point = Point::new(lon, lat);
        let engine = self.store.engine();
        let cells = self.store.cells();

        let mut ids: Vec<i64> = if let [tile] = tiles.as_slice() {
            cells
                .in_tile(*tile)
                .iter()
                .filter(|cell| cell.bbox().is_some_and(|b| b.contains_point(lon, lat)))
                .filter(|cell| engine.contains_point(&cell.geometry, point))
                .map(|cell| cell.place_id)
                .collect()
        } else {
            let mut touching: HashMap<i64, Vec<MultiPolygon<f64>>> = HashMap::new();
            for tile in &tiles {
                for cell in cells.in_tile(*tile) {
                    if cell.bbox().is_some_and(|b| b.contains_point(lon, lat)) {
                        touching
                            .entry(cell.place_id)
                            .or_default()
                            .push(cell.geometry.clone());
                    }
                }
            }
            touching
                .into_iter()
                .filter(|(_, parts)| engine.contains_point(&engine.union(parts), point))
                .map(|(id, _)| id)
                .collect()
        };
        ids.sort_unstable();
        ids.dedup();

        debug!("Grid lookup at ({}, {}) over {} tiles: {:?}", lon, lat, tiles.len(), ids);
        ids
    }

    pub fn cells_in_tile(&self, tile: TileId) -> Vec<Arc<GridCell>> {
        self.store.cells().in_tile(tile)
    }

    pub fn cells_for_place(&self, place_id: i64) -> Vec<Arc<GridCell>> {
        self.store.cells().for_place(place_id)
    }

    /// Tiles holding at least one cell, ascending
    pub fn tiles(&self) -> Vec<TileId> {
        self.store.cells().tiles()
    }

    pub fn cell_count(&self) -> usize {
        self.store.cells().len()
    }
}

fn clip_tile(view: &StoreView<'_>, tile: TileId) -> Vec<(i64, MultiPolygon<f64>)> {
    let engine = view.engine();
    let rect = tile.rect();

    view.candidates_overlapping(&tile.bbox())
        .into_iter()
        .filter_map(|id| {
            let geometry = view.get(id)?.geometry.as_ref()?;
            if !engine.intersects_rect(geometry, &rect) {
                return None;
            }
            let fragment = engine.intersection_with_rect(geometry, &rect);
            if fragment.0.is_empty() {
                None
            } else {
                Some((id, fragment))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Place;
    use geo::Area;
    use geo_types::polygon;

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min_x, y: min_y),
            (x: max_x, y: min_y),
            (x: max_x, y: max_y),
            (x: min_x, y: max_y),
        ]])
    }

    fn fragment_areas(cells: &[Arc<GridCell>]) -> Vec<(i64, i64)> {
        let mut areas: Vec<(i64, i64)> = cells
            .iter()
            .map(|c| (c.place_id, (c.geometry.unsigned_area() * 1e6).round() as i64))
            .collect();
        areas.sort_unstable();
        areas
    }

    #[test]
    fn test_build_tile_clips_to_tile() {
        let store = PlaceStore::temporary().unwrap();
        store
            .insert(Place::new(1, "A").with_geometry(square(-1.0, -1.0, 1.0, 1.0)))
            .unwrap();
        let grid = GridIndex::new(&store);

        assert_eq!(grid.build_tile(TileId::new(0, 0)).unwrap(), 1);
        let cells = grid.cells_in_tile(TileId::new(0, 0));
        assert_eq!(cells.len(), 1);
        assert!((cells[0].geometry.unsigned_area() - 1.0).abs() < 1e-9);
        let bbox = cells[0].bbox().unwrap();
        assert!(bbox.min_x >= 0.0 && bbox.max_x <= 1.0);

        assert_eq!(grid.build_tile(TileId::new(5, 5)).unwrap(), 0);
    }

    #[test]
    fn test_replace_mode_is_idempotent() {
        let store = PlaceStore::temporary().unwrap();
        store
            .insert(Place::new(1, "A").with_geometry(square(0.25, 0.25, 0.75, 0.75)))
            .unwrap();
        store
            .insert(Place::new(2, "B").with_geometry(square(-0.5, 0.5, 0.5, 1.5)))
            .unwrap();
        let grid = GridIndex::new(&store);
        let tile = TileId::new(0, 0);

        grid.build_tile(tile).unwrap();
        let first = fragment_areas(&grid.cells_in_tile(tile));
        grid.build_tile(tile).unwrap();
        let second = fragment_areas(&grid.cells_in_tile(tile));

        assert_eq!(first, second);
        assert_eq!(grid.cell_count(), 2);
    }

    #[test]
    fn test_additive_mode_duplicates() {
        let store = PlaceStore::temporary().unwrap();
        store
            .insert(Place::new(1, "A").with_geometry(square(0.25, 0.25, 0.75, 0.75)))
            .unwrap();
        let grid = GridIndex::new(&store).with_mode(BuildMode::Additive);
        let tile = TileId::new(0, 0);

        grid.build_tile(tile).unwrap();
        grid.build_tile(tile).unwrap();
        assert_eq!(grid.cells_in_tile(tile).len(), 2);
        assert_eq!(grid.lookup_point(0.5, 0.5), vec![1]);

        assert_eq!(grid.clear_tile(tile).unwrap(), 2);
        assert!(grid.cells_in_tile(tile).is_empty());
    }

    #[test]
    fn test_null_geometry_skipped() {
        let store = PlaceStore::temporary().unwrap();
        store.insert(Place::new(1, "Unresolved")).unwrap();
        let grid = GridIndex::new(&store);
        let report = grid.build_range(-1, -1, 0, 0).unwrap();
        assert_eq!(report.tiles_built, 4);
        assert_eq!(report.cells_written, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_build_range_and_lookup() {
        let store = PlaceStore::temporary().unwrap();
        store
            .insert(Place::new(1, "A").with_geometry(square(-1.0, -1.0, 1.0, 1.0)))
            .unwrap();
        let grid = GridIndex::new(&store);

        let report = grid.build_range(-2, -2, 1, 1).unwrap();
        assert_eq!(report.tiles_built, 16);
        assert_eq!(report.tiles_with_cells, 4);
        assert_eq!(report.cells_written, 4);
        assert_eq!(grid.cells_for_place(1).len(), 4);

        assert_eq!(grid.lookup_point(0.5, 0.5), vec![1]);
        assert_eq!(grid.lookup_point(-0.5, -0.5), vec![1]);
        assert!(grid.lookup_point(5.0, 5.0).is_empty());
    }

    #[test]
    fn test_lookup_on_tile_seams() {
        let store = PlaceStore::temporary().unwrap();
        store
            .insert(Place::new(1, "A").with_geometry(square(-1.0, -1.0, 1.0, 1.0)))
            .unwrap();
        store
            .insert(Place::new(2, "B").with_geometry(square(1.0, -1.0, 2.0, 0.0)))
            .unwrap();
        let grid = GridIndex::new(&store);
        grid.build_range(-2, -2, 2, 2).unwrap();

        assert_eq!(grid.lookup_point(0.0, 0.0), vec![1]);
        assert_eq!(grid.lookup_point(0.0, -0.5), vec![1]);
        assert_eq!(grid.lookup_point(-0.5, 0.0), vec![1]);
        // Shared edge of 1 and 2 belongs to neither interior
        assert!(grid.lookup_point(1.0, -0.5).is_empty());
        assert!(grid.lookup_point(-1.0, 0.5).is_empty());
        assert!(grid.lookup_point(1.0, 1.0).is_empty());
    }

    #[test]
    fn test_removing_place_drops_cells() {
        let store = PlaceStore::temporary().unwrap();
        store
            .insert(Place::new(1, "A").with_geometry(square(-1.0, -1.0, 1.0, 1.0)))
            .unwrap();
        store
            .insert(Place::new(2, "B").with_geometry(square(0.2, 0.2, 0.4, 0.4)))
            .unwrap();
        let grid = GridIndex::new(&store);
        grid.build_range(-1, -1, 0, 0).unwrap();
        assert_eq!(grid.cell_count(), 5);

        store.remove(1).unwrap();
        assert_eq!(grid.cell_count(), 1);
        assert!(grid.cells_for_place(1).is_empty());
        assert_eq!(grid.lookup_point(0.3, 0.3), vec![2]);
        assert!(grid.lookup_point(-0.5, -0.5).is_empty());
    }
}

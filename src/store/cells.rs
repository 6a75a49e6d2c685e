//! Persistent grid cell table.
//!
//! Two sled trees back the table:
//! - `cells`: tile key ++ cell id -> JSON [`GridCell`]
//! - `place_cells`: place id ++ cell id -> tile key
//!
//! The second tree lets a place deletion find and drop its cells inside
//! the same transaction that deletes the place row.

use std::sync::Arc;

use geo_types::MultiPolygon;
use hashbrown::HashMap;
use parking_lot::RwLock;
use sled::transaction::TransactionResult;
use sled::Transactional;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::place::place_key;
use crate::models::{GridCell, TileId};

const CELLS_TREE: &str = "cells";
const PLACE_CELLS_TREE: &str = "place_cells";

fn cell_key(tile: TileId, cell_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&tile.key());
    key.extend_from_slice(&cell_id.to_be_bytes());
    key
}

fn place_cell_key(place_id: i64, cell_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&place_key(place_id));
    key.extend_from_slice(&cell_id.to_be_bytes());
    key
}

#[derive(Default)]
struct CellState {
    by_tile: HashMap<TileId, Vec<Arc<GridCell>>>,
    by_place: HashMap<i64, Vec<(TileId, u64)>>,
    count: usize,
}

impl CellState {
    fn add(&mut self, cell: GridCell) {
        self.by_place
            .entry(cell.place_id)
            .or_default()
            .push((cell.tile, cell.id));
        self.by_tile
            .entry(cell.tile)
            .or_default()
            .push(Arc::new(cell));
        self.count += 1;
    }

    fn forget_tile(&mut self, tile: TileId) {
        let Some(cells) = self.by_tile.remove(&tile) else {
            return;
        };
        for cell in &cells {
            if let Some(owned) = self.by_place.get_mut(&cell.place_id) {
                owned.retain(|(_, id)| *id != cell.id);
                if owned.is_empty() {
                    self.by_place.remove(&cell.place_id);
                }
            }
        }
        self.count -= cells.len();
    }

    fn forget_place(&mut self, place_id: i64) {
        let Some(owned) = self.by_place.remove(&place_id) else {
            return;
        };
        for (tile, cell_id) in owned {
            if let Some(cells) = self.by_tile.get_mut(&tile) {
                cells.retain(|c| c.id != cell_id);
                if cells.is_empty() {
                    self.by_tile.remove(&tile);
                }
            }
            self.count -= 1;
        }
    }
}

/// Grid cells, persisted in sled and mirrored in memory by tile.
pub(crate) struct CellTable {
    db: sled::Db,
    cells: sled::Tree,
    place_cells: sled::Tree,
    state: RwLock<CellState>,
}

impl CellTable {
    pub fn open(db: &sled::Db) -> Result<Self> {
        let cells = db.open_tree(CELLS_TREE)?;
        let place_cells = db.open_tree(PLACE_CELLS_TREE)?;

        let mut state = CellState::default();
        for item in cells.iter() {
            let (_, value) = item?;
            let cell: GridCell = serde_json::from_slice(&value)?;
            state.add(cell);
        }
        info!(
            "Loaded {} grid cells across {} tiles",
            state.count,
            state.by_tile.len()
        );

        Ok(Self {
            db: db.clone(),
            cells,
            place_cells,
            state: RwLock::new(state),
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().count
    }

    pub fn in_tile(&self, tile: TileId) -> Vec<Arc<GridCell>> {
        self.state
            .read()
            .by_tile
            .get(&tile)
            .cloned()
            .unwrap_or_default()
    }

    pub fn for_place(&self, place_id: i64) -> Vec<Arc<GridCell>> {
        let state = self.state.read();
        let Some(owned) = state.by_place.get(&place_id) else {
            return Vec::new();
        };
        owned
            .iter()
            .filter_map(|(tile, cell_id)| {
                state
                    .by_tile
                    .get(tile)
                    .and_then(|cells| cells.iter().find(|c| c.id == *cell_id))
                    .cloned()
            })
            .collect()
    }

    pub fn tiles(&self) -> Vec<TileId> {
        let mut tiles: Vec<TileId> = self.state.read().by_tile.keys().copied().collect();
        tiles.sort_unstable();
        tiles
    }

    /// Write one tile's cells. Unless `additive`, the tile's previous cells
    /// are dropped in the same transaction. Returns the number written.
    pub fn write_tile(
        &self,
        tile: TileId,
        fragments: Vec<(i64, MultiPolygon<f64>)>,
        additive: bool,
    ) -> Result<usize> {
        let mut state = self.state.write();

        let stale: Vec<(Vec<u8>, Vec<u8>)> = if additive {
            Vec::new()
        } else {
            state
                .by_tile
                .get(&tile)
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| (cell_key(tile, c.id), place_cell_key(c.place_id, c.id)))
                        .collect()
                })
                .unwrap_or_default()
        };
        if stale.is_empty() && fragments.is_empty() {
            return Ok(0);
        }

        let mut fresh = Vec::with_capacity(fragments.len());
        for (place_id, geometry) in fragments {
            fresh.push(GridCell {
                id: self.db.generate_id()?,
                place_id,
                tile,
                geometry,
            });
        }
        let rows = fresh
            .iter()
            .map(|c| {
                Ok((
                    cell_key(tile, c.id),
                    serde_json::to_vec(c)?,
                    place_cell_key(c.place_id, c.id),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let tile_key = tile.key();

        let result: TransactionResult<()> =
            (&self.cells, &self.place_cells).transaction(|(cells, place_cells)| {
                for (cell, owner) in &stale {
                    cells.remove(cell.as_slice())?;
                    place_cells.remove(owner.as_slice())?;
                }
                for (cell, value, owner) in &rows {
                    cells.insert(cell.as_slice(), value.as_slice())?;
                    place_cells.insert(owner.as_slice(), &tile_key[..])?;
                }
                Ok(())
            });
        result?;

        if !additive {
            state.forget_tile(tile);
        }
        let written = fresh.len();
        for cell in fresh {
            state.add(cell);
        }

        debug!(
            "Tile {}: dropped {} cells, wrote {}",
            tile,
            stale.len(),
            written
        );
        Ok(written)
    }

    /// Drop a tile's cells, returning how many were removed.
    pub fn clear_tile(&self, tile: TileId) -> Result<usize> {
        let before = self
            .state
            .read()
            .by_tile
            .get(&tile)
            .map_or(0, |cells| cells.len());
        self.write_tile(tile, Vec::new(), false)?;
        Ok(before)
    }

    /// Delete a place row together with all of its cells.
    pub fn remove_place(&self, places: &sled::Tree, place_id: i64) -> Result<()> {
        let mut state = self.state.write();

        let owned: Vec<(Vec<u8>, Vec<u8>)> = state
            .by_place
            .get(&place_id)
            .map(|owned| {
                owned
                    .iter()
                    .map(|(tile, cell_id)| {
                        (cell_key(*tile, *cell_id), place_cell_key(place_id, *cell_id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let row = place_key(place_id);

        let result: TransactionResult<()> = (places, &self.cells, &self.place_cells)
            .transaction(|(places, cells, place_cells)| {
                places.remove(&row[..])?;
                for (cell, owner) in &owned {
                    cells.remove(cell.as_slice())?;
                    place_cells.remove(owner.as_slice())?;
                }
                Ok(())
            });
        result?;

        state.forget_place(place_id);
        debug!("Removed place {} and {} cells", place_id, owned.len());
        Ok(())
    }
}

//! Tiles and the grid cells clipped into them.

use geo_types::{coord, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use super::BBox;

/// A 1°×1° tile addressed by its lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
}

impl TileId {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tile whose half-open square `[x, x+1) × [y, y+1)` holds the point
    pub fn containing(lon: f64, lat: f64) -> Self {
        Self::new(lon.floor() as i32, lat.floor() as i32)
    }

    /// Every tile whose closed square holds the point: one in a tile's
    /// interior, two on an edge, four on a corner.
    pub fn touching(lon: f64, lat: f64) -> Vec<TileId> {
        let xs = touching_axis(lon);
        let ys = touching_axis(lat);
        ys.iter()
            .flat_map(|&y| xs.iter().map(move |&x| TileId::new(x, y)))
            .collect()
    }

    /// `[x, x+1] × [y, y+1]`
    pub fn rect(&self) -> Rect<f64> {
        let x = f64::from(self.x);
        let y = f64::from(self.y);
        Rect::new(coord! { x: x, y: y }, coord! { x: x + 1.0, y: y + 1.0 })
    }

    pub fn bbox(&self) -> BBox {
        let x = f64::from(self.x);
        let y = f64::from(self.y);
        BBox::new(x, y, x + 1.0, y + 1.0)
    }

    /// Every tile in the inclusive range, row by row
    pub fn range(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Vec<TileId> {
        (min_y..=max_y)
            .flat_map(|y| (min_x..=max_x).map(move |x| TileId::new(x, y)))
            .collect()
    }

    /// Byte key that sorts tiles by (x, y)
    pub(crate) fn key(&self) -> [u8; 8] {
        let mut key = [0u8; 8];
        key[0..4].copy_from_slice(&((self.x as u32) ^ 0x8000_0000).to_be_bytes());
        key[4..8].copy_from_slice(&((self.y as u32) ^ 0x8000_0000).to_be_bytes());
        key
    }
}

fn touching_axis(v: f64) -> Vec<i32> {
    let floor = v.floor();
    if floor == v {
        vec![floor as i32 - 1, floor as i32]
    } else {
        vec![floor as i32]
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A fragment of one place's geometry clipped to one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    /// Auto-assigned row id
    pub id: u64,
    pub place_id: i64,
    pub tile: TileId,
    pub geometry: MultiPolygon<f64>,
}

impl GridCell {
    pub fn bbox(&self) -> Option<BBox> {
        BBox::of(&self.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containing_floors() {
        assert_eq!(TileId::containing(0.5, 0.5), TileId::new(0, 0));
        assert_eq!(TileId::containing(-0.5, 0.5), TileId::new(-1, 0));
        assert_eq!(TileId::containing(0.0, 0.0), TileId::new(0, 0));
        assert_eq!(TileId::containing(-180.0, -90.0), TileId::new(-180, -90));
    }

    #[test]
    fn test_touching_tiles() {
        assert_eq!(TileId::touching(0.5, 0.5), vec![TileId::new(0, 0)]);
        assert_eq!(
            TileId::touching(0.0, 0.5),
            vec![TileId::new(-1, 0), TileId::new(0, 0)]
        );
        let corner = TileId::touching(0.0, 0.0);
        assert_eq!(corner.len(), 4);
        assert!(corner.contains(&TileId::new(-1, -1)));
        assert!(corner.contains(&TileId::new(0, 0)));
    }

    #[test]
    fn test_range_inclusive() {
        let tiles = TileId::range(-1, -1, 0, 0);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&TileId::new(-1, -1)));
        assert!(tiles.contains(&TileId::new(0, 0)));
        assert!(TileId::range(1, 0, 0, 0).is_empty());
    }

    #[test]
    fn test_key_order() {
        let a = TileId::new(-2, 5);
        let b = TileId::new(-1, -90);
        let c = TileId::new(0, -90);
        assert!(a.key() < b.key());
        assert!(b.key() < c.key());
        assert_ne!(a.key(), TileId::new(-2, 6).key());
    }

    #[test]
    fn test_tile_rect() {
        let rect = TileId::new(-1, 2).rect();
        assert_eq!(rect.min().x, -1.0);
        assert_eq!(rect.max().y, 3.0);
    }
}

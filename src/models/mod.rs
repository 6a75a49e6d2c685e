//! Core data models for the place store.

pub mod bbox;
pub mod grid;
pub mod place;

pub use bbox::BBox;
pub use grid::{GridCell, TileId};
pub use place::Place;

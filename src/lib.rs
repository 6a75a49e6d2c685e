//! Placegrid - polygon store with bounding-box pruning and a 1° tile grid
//!
//! This library provides the place store, grid index, query and extraction
//! engines used by the `placegrid` binary.

pub mod config;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod grid;
pub mod models;
pub mod pip;
pub mod report;
pub mod store;

pub use error::{PlaceError, Result};
pub use extract::ExtractionEngine;
pub use grid::{BuildMode, GridIndex};
pub use models::{BBox, GridCell, Place, TileId};
pub use pip::{PipStrategy, QueryEngine};
pub use store::PlaceStore;
